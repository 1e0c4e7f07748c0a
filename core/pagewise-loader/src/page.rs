//! Page envelopes returned by the data service.

use crate::error::{LoaderError, LoaderResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The outcome of one round-trip of a paged query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResponse<T> {
    pub items: Vec<T>,
    /// Opaque link to the next page; `None` on the last page.
    pub continuation_token: Option<String>,
    /// Total matches across all pages, when the server reported it.
    pub total_count: Option<u64>,
}

/// A page of data together with the total number of matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginationResult<T> {
    pub total_items: u64,
    pub page_data: Vec<T>,
}

/// A page before its entries are converted to a typed entity.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RawPage {
    pub entries: Vec<Value>,
    pub next: Option<String>,
    pub count: Option<u64>,
}

impl RawPage {
    /// Reads any of the accepted envelopes:
    /// `{"value": [...], "@odata.nextLink": ..., "@odata.count": ...}`,
    /// `{"d": {"results": [...], "__next": ..., "__count": ...}}` or a bare array.
    pub fn parse(body: Value) -> LoaderResult<Self> {
        match body {
            Value::Array(entries) => Ok(RawPage {
                entries,
                next: None,
                count: None,
            }),
            Value::Object(mut object) => {
                if let Some(Value::Object(mut d)) = object.remove("d") {
                    let entries = match d.remove("results") {
                        Some(Value::Array(entries)) => entries,
                        _ => {
                            return Err(LoaderError::Payload(
                                "verbose envelope has no results array".to_string(),
                            ));
                        }
                    };
                    return Ok(RawPage {
                        entries,
                        next: link(d.get("__next")),
                        count: count(d.get("__count"))?,
                    });
                }

                let entries = match object.remove("value") {
                    Some(Value::Array(entries)) => entries,
                    _ => {
                        return Err(LoaderError::Payload(
                            "page has no value array".to_string(),
                        ));
                    }
                };
                let next = link(object.get("@odata.nextLink")).or_else(|| link(object.get("odata.nextLink")));
                let total = match object.get("@odata.count") {
                    Some(v) => count(Some(v))?,
                    None => count(object.get("odata.count"))?,
                };
                Ok(RawPage {
                    entries,
                    next,
                    count: total,
                })
            }
            other => Err(LoaderError::Payload(format!(
                "expected a page object or array, got {}",
                kind(&other)
            ))),
        }
    }

    pub fn into_typed<T: DeserializeOwned>(self) -> LoaderResult<PageResponse<T>> {
        let items = self
            .entries
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<T>, _>>()?;
        Ok(PageResponse {
            items,
            continuation_token: self.next,
            total_count: self.count,
        })
    }
}

/// The token exactly as the server sent it; only an empty string means none.
fn link(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn count(value: Option<&Value>) -> LoaderResult<Option<u64>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| LoaderError::Payload(format!("count is not a whole number: {n}"))),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| LoaderError::Payload(format!("count is not a whole number: {s:?}"))),
        Some(other) => Err(LoaderError::Payload(format!(
            "count has unexpected type {}",
            kind(other)
        ))),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn v4_envelope() {
        let page = RawPage::parse(json!({
            "value": [{"Id": 1}],
            "@odata.nextLink": "Items?$skiptoken=1",
            "@odata.count": 3
        }))
        .unwrap();
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.next.as_deref(), Some("Items?$skiptoken=1"));
        assert_eq!(page.count, Some(3));
    }

    #[test]
    fn v3_envelope_with_string_count() {
        let page = RawPage::parse(json!({
            "value": [],
            "odata.nextLink": "next",
            "odata.count": "12"
        }))
        .unwrap();
        assert_eq!(page.next.as_deref(), Some("next"));
        assert_eq!(page.count, Some(12));
    }

    #[test]
    fn verbose_envelope() {
        let page = RawPage::parse(json!({
            "d": {"results": [{"Id": 1}, {"Id": 2}], "__count": "2"}
        }))
        .unwrap();
        assert_eq!(page.entries.len(), 2);
        assert_eq!(page.next, None);
        assert_eq!(page.count, Some(2));
    }

    #[test]
    fn bare_array() {
        let page = RawPage::parse(json!([{"Id": 1}])).unwrap();
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.count, None);
    }

    #[test]
    fn next_link_is_kept_verbatim() {
        let page =
            RawPage::parse(json!({"value": [], "@odata.nextLink": " Items?$skiptoken=1 "})).unwrap();
        assert_eq!(page.next.as_deref(), Some(" Items?$skiptoken=1 "));

        let page = RawPage::parse(json!({"value": [], "@odata.nextLink": "  "})).unwrap();
        assert_eq!(page.next.as_deref(), Some("  "));
    }

    #[test]
    fn empty_next_link_ends_the_walk() {
        let page = RawPage::parse(json!({"value": [], "@odata.nextLink": ""})).unwrap();
        assert_eq!(page.next, None);
    }

    #[test]
    fn rejects_other_shapes() {
        assert!(RawPage::parse(json!("text")).is_err());
        assert!(RawPage::parse(json!({"items": []})).is_err());
        assert!(RawPage::parse(json!({"value": [], "@odata.count": -1})).is_err());
    }
}
