//! Serialization bridge between typed values and wire bodies.
//!
//! Outbound bodies follow the configured [`MessageFormat`]. Inbound bodies
//! are classified by [`sniff`]: a well-formed JSON object or array is JSON,
//! anything else is handed to the XML deserializer.

use crate::config::MessageFormat;
use crate::error::{TransportError, TransportResult};
use quick_xml::events::{BytesText, Event};
use quick_xml::{Reader, Writer};
use serde::Serialize;
use serde::de::value::{Error as ValueError, StringDeserializer};
use serde::de::{DeserializeOwned, IgnoredAny, IntoDeserializer};
use serde::Deserialize;
use std::any::{TypeId, type_name};

/// How an inbound body was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Json,
    Xml,
}

/// Classifies a body by its structure.
///
/// Only a complete, well-formed JSON object or array counts as JSON; JSON
/// scalars and malformed JSON fall through to XML.
pub fn sniff(text: &str) -> PayloadKind {
    let trimmed = text.trim();
    let bracketed = (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'));
    if bracketed && serde_json::from_str::<IgnoredAny>(trimmed).is_ok() {
        PayloadKind::Json
    } else {
        PayloadKind::Xml
    }
}

#[derive(Deserialize)]
struct XmlList<T> {
    #[serde(rename = "$value", default = "Vec::new")]
    items: Vec<T>,
}

/// Encodes request bodies and decodes response bodies.
#[derive(Debug, Clone)]
pub struct MessageSerializer {
    format: MessageFormat,
    default_namespace: String,
}

impl MessageSerializer {
    /// Creates a serializer writing `format` with `default_namespace` on XML roots.
    pub fn new(format: MessageFormat, default_namespace: impl Into<String>) -> Self {
        Self {
            format,
            default_namespace: default_namespace.into(),
        }
    }

    /// The outbound format.
    pub fn format(&self) -> MessageFormat {
        self.format
    }

    /// `Content-Type` for outbound bodies.
    pub fn content_type(&self) -> &'static str {
        self.format.content_type()
    }

    /// Encodes `body` in the configured format.
    ///
    /// For XML the root element receives `namespace`, or the default namespace
    /// when no override is given.
    pub fn serialize<B>(&self, body: &B, namespace: Option<&str>) -> TransportResult<Vec<u8>>
    where
        B: Serialize + ?Sized,
    {
        match self.format {
            MessageFormat::Json => serde_json::to_vec(body).map_err(|e| {
                TransportError::Serialize(format!("{} to JSON: {e}", type_name::<B>()))
            }),
            MessageFormat::Xml => {
                let xml = quick_xml::se::to_string(body).map_err(|e| {
                    TransportError::Serialize(format!("{} to XML: {e}", type_name::<B>()))
                })?;
                let namespace = namespace.unwrap_or(&self.default_namespace);
                Ok(finish_xml(&xml, namespace)?.into_bytes())
            }
        }
    }

    /// Decodes a single value from a response body.
    pub fn deserialize<T>(&self, body: &[u8]) -> TransportResult<T>
    where
        T: DeserializeOwned + 'static,
    {
        let text = decode_text(body)?;
        match sniff(text) {
            PayloadKind::Json => serde_json::from_str(text.trim()).map_err(|e| {
                TransportError::Deserialize(format!("{} from JSON: {e}", type_name::<T>()))
            }),
            PayloadKind::Xml if TypeId::of::<T>() == TypeId::of::<String>() => {
                let content = read_xml_string(text).map_err(|e| {
                    TransportError::Deserialize(format!("string from XML: {e}"))
                })?;
                let de: StringDeserializer<ValueError> = content.into_deserializer();
                T::deserialize(de).map_err(|e| TransportError::Deserialize(e.to_string()))
            }
            PayloadKind::Xml => quick_xml::de::from_str(text).map_err(|e| {
                TransportError::Deserialize(format!("{} from XML: {e}", type_name::<T>()))
            }),
        }
    }

    /// Decodes a sequence from a response body.
    ///
    /// XML sequences are the children of the root element, whatever their
    /// element names.
    pub fn deserialize_list<T>(&self, body: &[u8]) -> TransportResult<Vec<T>>
    where
        T: DeserializeOwned + 'static,
    {
        let text = decode_text(body)?;
        match sniff(text) {
            PayloadKind::Json => serde_json::from_str(text.trim()).map_err(|e| {
                TransportError::Deserialize(format!("[{}] from JSON: {e}", type_name::<T>()))
            }),
            PayloadKind::Xml => quick_xml::de::from_str::<XmlList<T>>(text)
                .map(|list| list.items)
                .map_err(|e| {
                    TransportError::Deserialize(format!("[{}] from XML: {e}", type_name::<T>()))
                }),
        }
    }
}

fn decode_text(body: &[u8]) -> TransportResult<&str> {
    let body = body.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(body);
    std::str::from_utf8(body)
        .map_err(|e| TransportError::Deserialize(format!("body is not valid UTF-8: {e}")))
}

/// Reads the text content of a single-element XML document such as
/// `<string xmlns="...">value</string>`.
fn read_xml_string(xml: &str) -> Result<String, String> {
    let mut reader = Reader::from_str(xml);
    let mut depth = 0usize;
    let mut content = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(_)) => {
                depth += 1;
                if depth > 1 {
                    return Err("unexpected child element in string payload".to_string());
                }
            }
            Ok(Event::Empty(_)) if depth == 0 => return Ok(String::new()),
            Ok(Event::Text(text)) if depth == 1 => {
                let unescaped = text.unescape().map_err(|e| e.to_string())?;
                content.push_str(&unescaped);
            }
            Ok(Event::CData(data)) if depth == 1 => {
                content.push_str(&String::from_utf8_lossy(&data.into_inner()));
            }
            Ok(Event::End(_)) => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Ok(content);
                }
            }
            Ok(Event::Eof) => return Err("no root element".to_string()),
            Ok(_) => {}
            Err(e) => return Err(e.to_string()),
        }
    }
}

/// Puts `xmlns="namespace"` on the root element unless it already has one
/// or `namespace` is empty, and writes leading and trailing whitespace of text
/// content as character references.
///
/// The XML deserializer trims raw text, so edge whitespace written literally
/// would not read back.
fn finish_xml(xml: &str, namespace: &str) -> TransportResult<String> {
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Vec::new());
    let mut root_done = namespace.is_empty();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| TransportError::Serialize(format!("re-reading XML: {e}")))?;
        let event = match event {
            Event::Eof => break,
            Event::Start(start) if !root_done => {
                root_done = true;
                let mut start = start.into_owned();
                if !has_xmlns(&start) {
                    start.push_attribute(("xmlns", namespace));
                }
                Event::Start(start)
            }
            Event::Empty(start) if !root_done => {
                root_done = true;
                let mut start = start.into_owned();
                if !has_xmlns(&start) {
                    start.push_attribute(("xmlns", namespace));
                }
                Event::Empty(start)
            }
            Event::Text(text) => match protect_edges(&text) {
                Some(escaped) => Event::Text(BytesText::from_escaped(escaped)),
                None => Event::Text(text),
            },
            other => other,
        };
        writer
            .write_event(event)
            .map_err(|e| TransportError::Serialize(format!("writing XML: {e}")))?;
    }

    String::from_utf8(writer.into_inner())
        .map_err(|e| TransportError::Serialize(format!("XML is not UTF-8: {e}")))
}

fn is_xml_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\r')
}

/// Escaped text with its edge whitespace as character references, or `None`
/// when there is nothing to protect.
fn protect_edges(raw: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(raw).ok()?;
    let head = text.len() - text.trim_start_matches(is_xml_space).len();
    let tail = text.trim_end_matches(is_xml_space).len();
    if head == 0 && tail == text.len() {
        return None;
    }

    let mut out = String::with_capacity(text.len() + 16);
    let push_refs = |out: &mut String, part: &str| {
        for c in part.chars() {
            out.push_str(&format!("&#{};", c as u32));
        }
    };
    if tail <= head {
        push_refs(&mut out, text);
    } else {
        push_refs(&mut out, &text[..head]);
        out.push_str(&text[head..tail]);
        push_refs(&mut out, &text[tail..]);
    }
    Some(out)
}

fn has_xmlns(start: &quick_xml::events::BytesStart<'_>) -> bool {
    start
        .attributes()
        .flatten()
        .any(|attr| attr.key.as_ref() == b"xmlns")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Item {
        id: i64,
        name: String,
    }

    #[test]
    fn sniff_objects_and_arrays() {
        assert_eq!(sniff(r#"{"id":1}"#), PayloadKind::Json);
        assert_eq!(sniff("  [1,2]\n"), PayloadKind::Json);
    }

    #[test]
    fn sniff_rejects_scalars_and_broken_json() {
        assert_eq!(sniff(r#""text""#), PayloadKind::Xml);
        assert_eq!(sniff("42"), PayloadKind::Xml);
        assert_eq!(sniff(r#"{"id":1"#), PayloadKind::Xml);
        assert_eq!(sniff("{not json}"), PayloadKind::Xml);
        assert_eq!(sniff("<Item><id>1</id></Item>"), PayloadKind::Xml);
    }

    #[test]
    fn namespace_lands_on_root_only() {
        let xml = finish_xml("<Item><id>1</id></Item>", "urn:test").unwrap();
        assert_eq!(xml, r#"<Item xmlns="urn:test"><id>1</id></Item>"#);
    }

    #[test]
    fn existing_namespace_is_kept() {
        let xml = finish_xml(r#"<Item xmlns="urn:a"/>"#, "urn:b").unwrap();
        assert_eq!(xml, r#"<Item xmlns="urn:a"/>"#);
    }

    #[test]
    fn edge_whitespace_becomes_character_references() {
        let xml = finish_xml("<Item><name>  a &amp; b\n</name><id>1</id></Item>", "").unwrap();
        assert_eq!(xml, "<Item><name>&#32;&#32;a &amp; b&#10;</name><id>1</id></Item>");
        assert_eq!(protect_edges(b"plain"), None);
        assert_eq!(protect_edges(b"").as_deref(), None);
        assert_eq!(protect_edges(b" \t").as_deref(), Some("&#32;&#9;"));
    }

    #[test]
    fn padded_text_survives_xml() {
        let serializer = MessageSerializer::new(MessageFormat::Xml, "");
        let item = Item {
            id: 1,
            name: "  padded  ".into(),
        };
        let back: Item = serializer
            .deserialize(&serializer.serialize(&item, None).unwrap())
            .unwrap();
        assert_eq!(back, item);

        let blank = Item {
            id: 2,
            name: "   ".into(),
        };
        let back: Item = serializer
            .deserialize(&serializer.serialize(&blank, None).unwrap())
            .unwrap();
        assert_eq!(back, blank);
    }

    #[test]
    fn string_reader_handles_escapes_and_empty() {
        assert_eq!(read_xml_string("<string>a &amp; b</string>").unwrap(), "a & b");
        assert_eq!(read_xml_string("<string/>").unwrap(), "");
        assert!(read_xml_string("plain").is_err());
        assert!(read_xml_string("<s><t>x</t></s>").is_err());
    }

    #[test]
    fn bom_is_ignored() {
        let serializer = MessageSerializer::new(MessageFormat::Json, "");
        let mut body = b"\xEF\xBB\xBF".to_vec();
        body.extend_from_slice(br#"{"id":3,"name":"c"}"#);
        let item: Item = serializer.deserialize(&body).unwrap();
        assert_eq!(item, Item { id: 3, name: "c".into() });
    }
}
