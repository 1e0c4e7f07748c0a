//! Buffered backend on the `reqwest` async client.

use super::{header_pairs, reqwest_method};
use crate::error::{TransportError, TransportResult};
use crate::http::{CallError, CallStrategy, HttpRequest, HttpResponse};
use async_trait::async_trait;
use reqwest::Client;

/// Delegates to a `reqwest` request builder and buffers the whole body.
///
/// The body is returned as raw bytes; `reqwest`'s own typed decoding is never
/// used, the transport sniffs the content instead.
#[derive(Debug, Clone)]
pub struct BufferedCall {
    client: Client,
}

impl BufferedCall {
    /// Builds the underlying client.
    pub fn new() -> TransportResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| TransportError::Configuration(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl CallStrategy for BufferedCall {
    fn name(&self) -> &'static str {
        "buffered"
    }

    async fn call(&self, request: HttpRequest) -> Result<HttpResponse, CallError> {
        let mut builder = self
            .client
            .request(reqwest_method(request.method), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = header_pairs(response.headers());
        let body = response.bytes().await?.to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
