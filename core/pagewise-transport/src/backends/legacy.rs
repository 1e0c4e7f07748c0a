//! Legacy backend on the `reqwest` blocking client.

use super::{header_pairs, reqwest_method};
use crate::http::{CallError, CallStrategy, HttpRequest, HttpResponse};
use async_trait::async_trait;
use reqwest::blocking::Client;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Performs calls with the synchronous `reqwest` client on tokio's blocking
/// pool.
///
/// The blocking client owns a private runtime, so it is created lazily on the
/// blocking pool and dropped on a plain thread; neither may happen on an
/// async worker.
#[derive(Debug)]
pub struct LegacyBlockingCall {
    client: Arc<Mutex<Option<Client>>>,
    timeout: Option<Duration>,
}

impl LegacyBlockingCall {
    /// `timeout_secs` of 0 leaves the client without a timeout.
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            client: Arc::new(Mutex::new(None)),
            timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
        }
    }
}

fn blocking_call(
    slot: &Mutex<Option<Client>>,
    timeout: Option<Duration>,
    request: HttpRequest,
) -> Result<HttpResponse, CallError> {
    let client = {
        let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(client) => client.clone(),
            None => {
                let client = Client::builder().timeout(timeout).build()?;
                *guard = Some(client.clone());
                client
            }
        }
    };

    let mut builder = client.request(reqwest_method(request.method), &request.url);
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = request.body {
        builder = builder.body(body);
    }

    let response = builder.send()?;
    let status = response.status().as_u16();
    let headers = header_pairs(response.headers());
    let body = response.bytes()?.to_vec();

    Ok(HttpResponse {
        status,
        headers,
        body,
    })
}

#[async_trait]
impl CallStrategy for LegacyBlockingCall {
    fn name(&self) -> &'static str {
        "legacy"
    }

    async fn call(&self, request: HttpRequest) -> Result<HttpResponse, CallError> {
        let slot = Arc::clone(&self.client);
        let timeout = self.timeout;
        let handle = tokio::task::spawn_blocking(move || blocking_call(&slot, timeout, request));
        handle.await?
    }
}

impl Drop for LegacyBlockingCall {
    fn drop(&mut self) {
        let client = self
            .client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(client) = client {
            let spawned = std::thread::Builder::new()
                .name("pagewise-legacy-drop".to_string())
                .spawn(move || drop(client));
            if let Err(e) = spawned {
                debug!("could not drop legacy client off-thread: {}", e);
            }
        }
    }
}
