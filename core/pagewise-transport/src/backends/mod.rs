//! Call strategies, one per backend kind.
//!
//! - [`BufferedCall`]: `reqwest` async client, buffered bodies
//! - [`NativeCall`]: pooled hyper client, bodies read as text
//! - [`LegacyBlockingCall`]: `reqwest` blocking client on the blocking pool
//! - [`RawCall`]: a fresh hyper HTTP/1 connection per request

mod buffered;
mod legacy;
mod native;
mod raw;

pub use buffered::BufferedCall;
pub use legacy::LegacyBlockingCall;
pub use native::NativeCall;
pub use raw::RawCall;

use crate::http::HttpMethod;

fn reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
    }
}

fn hyper_method(method: HttpMethod) -> hyper::Method {
    match method {
        HttpMethod::Get => hyper::Method::GET,
        HttpMethod::Post => hyper::Method::POST,
        HttpMethod::Put => hyper::Method::PUT,
        HttpMethod::Patch => hyper::Method::PATCH,
        HttpMethod::Delete => hyper::Method::DELETE,
    }
}

/// Lower-cased header pairs; values that are not visible ASCII are skipped.
///
/// `reqwest` and hyper share the same `http` header map.
fn header_pairs(headers: &hyper::HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_lowercase(), v.to_string()))
        })
        .collect()
}
