//! Raw backend: one hyper HTTP/1 connection per request.

use super::{header_pairs, hyper_method};
use crate::http::{CallError, CallStrategy, HttpRequest, HttpResponse};
use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::client::conn::http1;
use hyper::header::HOST;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tracing::debug;

/// Builds a new connection and request object for every call.
///
/// Nothing is pooled or reused: each call dials the host, performs the
/// HTTP/1 handshake, writes the body bytes and reads the response body frame
/// by frame. Plain `http://` only.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCall;

impl RawCall {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CallStrategy for RawCall {
    fn name(&self) -> &'static str {
        "raw"
    }

    async fn call(&self, request: HttpRequest) -> Result<HttpResponse, CallError> {
        let uri: hyper::Uri = request.url.parse()?;
        if uri.scheme_str() != Some("http") {
            return Err(format!("raw backend cannot reach {}: only http is supported", request.url).into());
        }
        let authority = uri
            .authority()
            .ok_or("request URL has no host")?
            .to_string();
        let host = uri
            .host()
            .ok_or("request URL has no host")?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = uri.port_u16().unwrap_or(80);
        let target = uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());

        let stream = TcpStream::connect((host.as_str(), port)).await?;
        let (mut sender, connection) = http1::handshake::<_, Full<Bytes>>(TokioIo::new(stream)).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!("raw connection ended with error: {}", e);
            }
        });

        let mut builder = hyper::Request::builder()
            .method(hyper_method(request.method))
            .uri(target)
            .header(HOST, authority);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let payload = Full::new(Bytes::from(request.body.unwrap_or_default()));

        let response = sender.send_request(builder.body(payload)?).await?;
        let status = response.status().as_u16();
        let headers = header_pairs(response.headers());

        let mut body = response.into_body();
        let mut buffer = Vec::new();
        while let Some(frame) = body.frame().await {
            if let Some(chunk) = frame?.data_ref() {
                buffer.extend_from_slice(chunk);
            }
        }

        Ok(HttpResponse {
            status,
            headers,
            body: buffer,
        })
    }
}
