//! Query options and their composition onto a base query.

use std::fmt;

/// One `option=value` pair appended to a query, e.g. `$top=10`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOption {
    pub option: String,
    pub query: String,
}

impl QueryOption {
    pub fn new(option: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            option: option.into(),
            query: query.into(),
        }
    }

    pub fn filter(expression: impl Into<String>) -> Self {
        Self::new("$filter", expression)
    }

    pub fn top(count: u64) -> Self {
        Self::new("$top", count.to_string())
    }

    pub fn skip(count: u64) -> Self {
        Self::new("$skip", count.to_string())
    }

    pub fn order_by(expression: impl Into<String>) -> Self {
        Self::new("$orderby", expression)
    }

    /// Requests the total match count alongside the page.
    pub fn inline_count() -> Self {
        Self::new(INLINE_COUNT, "allpages")
    }
}

impl fmt::Display for QueryOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.option, urlencoding::encode(&self.query))
    }
}

pub(crate) const INLINE_COUNT: &str = "$inlinecount";

/// Appends `options` to `base` in order, with no de-duplication.
///
/// Values are percent-encoded; option names are not.
pub fn compose(base: &str, options: &[QueryOption]) -> String {
    let mut url = base.to_string();
    for option in options {
        let separator = if url.contains('?') { '&' } else { '?' };
        url.push(separator);
        url.push_str(&option.to_string());
    }
    url
}

/// Whether `option` already appears in the query string of `url` or in `options`.
pub(crate) fn has_option(url: &str, options: &[QueryOption], option: &str) -> bool {
    let in_url = url
        .split_once('?')
        .map(|(_, query)| {
            query
                .split('&')
                .any(|pair| pair.split('=').next() == Some(option))
        })
        .unwrap_or(false);
    in_url || options.iter().any(|o| o.option == option)
}
