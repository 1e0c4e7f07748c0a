//! Async-native backend on hyper's pooled client.

use super::{header_pairs, hyper_method};
use crate::http::{CallError, CallStrategy, HttpRequest, HttpResponse};
use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;

/// Issues calls through a long-lived, pooled hyper client.
///
/// The response body is read as UTF-8 text before it is handed to the
/// serialization bridge; a body that is not valid UTF-8 fails the call.
/// Plain `http://` only.
#[derive(Clone)]
pub struct NativeCall {
    client: Client<HttpConnector, Full<Bytes>>,
}

impl NativeCall {
    /// Builds the pooled client. No connection is opened until the first call.
    pub fn new() -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self { client }
    }
}

impl Default for NativeCall {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CallStrategy for NativeCall {
    fn name(&self) -> &'static str {
        "native"
    }

    async fn call(&self, request: HttpRequest) -> Result<HttpResponse, CallError> {
        let mut builder = hyper::Request::builder()
            .method(hyper_method(request.method))
            .uri(request.url.as_str());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let body = Full::new(Bytes::from(request.body.unwrap_or_default()));

        let response = self.client.request(builder.body(body)?).await?;
        let status = response.status().as_u16();
        let headers = header_pairs(response.headers());
        let bytes = response.into_body().collect().await?.to_bytes();
        let text = String::from_utf8(bytes.to_vec())?;

        Ok(HttpResponse {
            status,
            headers,
            body: text.into_bytes(),
        })
    }
}
