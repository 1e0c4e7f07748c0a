//! The shared transport: one contract, pluggable call mechanics.

use crate::cancel::CancellationScope;
use crate::config::TransportConfig;
use crate::contract::DataTransport;
use crate::error::{TransportError, TransportResult, flatten_error_chain};
use crate::http::{CallStrategy, HttpMethod, HttpRequest, HttpResponse};
use crate::serializer::MessageSerializer;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::debug;

const ACCEPT: &str = "application/json, application/xml;q=0.9";

/// A client bound to one backend for its whole lifetime.
///
/// All four backends share this type: URL resolution, cancellation, the
/// timeout, status checks, error flattening and (de)serialization happen here,
/// and only the network call itself is delegated to the [`CallStrategy`].
/// Dropping the transport signals its cancellation scope.
pub struct Transport {
    config: TransportConfig,
    serializer: MessageSerializer,
    strategy: Box<dyn CallStrategy>,
    cancel: CancellationScope,
    blocking: BlockingRuntime,
}

impl Transport {
    /// Creates a transport around an arbitrary call strategy.
    ///
    /// [`TransportFactory`](crate::TransportFactory) is the usual entry point;
    /// this is exposed for custom or instrumented strategies.
    pub fn with_strategy(config: TransportConfig, strategy: Box<dyn CallStrategy>) -> Self {
        let serializer = MessageSerializer::new(config.message_format, config.default_namespace.clone());
        Self {
            config,
            serializer,
            strategy,
            cancel: CancellationScope::new(),
            blocking: BlockingRuntime::default(),
        }
    }

    /// The configuration this transport was built with.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Name of the backend performing the calls.
    pub fn backend_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// The serialization bridge used for bodies.
    pub fn serializer(&self) -> &MessageSerializer {
        &self.serializer
    }

    /// The cancellation scope observed by every call.
    pub fn cancellation(&self) -> &CancellationScope {
        &self.cancel
    }

    /// Cancels in-flight calls and fails all later ones.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Resolves `path` against the base URL.
    pub fn resolve(&self, path: &str) -> String {
        self.config.resolve(path)
    }

    /// Performs `request` without interpreting the status.
    ///
    /// The scope is checked before the call, raced against it, and checked
    /// again afterwards. Strategy failures are flattened into
    /// [`TransportError::Network`].
    pub async fn exchange(&self, request: HttpRequest) -> TransportResult<HttpResponse> {
        self.cancel.check()?;
        debug!("{} {} via {}", request.method, request.url, self.backend_name());

        let timeout_secs = self.config.timeout_secs;
        let call = async {
            let outcome = if timeout_secs == 0 {
                Ok(self.strategy.call(request).await)
            } else {
                tokio::time::timeout(Duration::from_secs(timeout_secs), self.strategy.call(request))
                    .await
            };
            match outcome {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(e)) => Err(TransportError::Network(flatten_error_chain(&*e))),
                Err(_) => Err(TransportError::Timeout(timeout_secs)),
            }
        };

        let response = self.cancel.run(call).await?;
        self.cancel.check()?;
        debug!("{} response from {}", response.status, self.backend_name());
        Ok(response)
    }

    /// Performs `request` and fails on any non-2xx status.
    pub async fn send(&self, request: HttpRequest) -> TransportResult<HttpResponse> {
        let response = self.exchange(request).await?;
        if !response.is_success() {
            return Err(TransportError::Status {
                status: response.status,
                body: response.body_text(),
            });
        }
        Ok(response)
    }

    fn request(&self, method: HttpMethod, path: &str) -> HttpRequest {
        HttpRequest::new(method, self.resolve(path)).header("Accept", ACCEPT)
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("backend", &self.backend_name())
            .field("config", &self.config)
            .finish()
    }
}

#[async_trait]
impl DataTransport for Transport {
    async fn get_single<R>(&self, path: &str) -> TransportResult<R>
    where
        R: DeserializeOwned + Send + 'static,
    {
        let response = self.send(self.request(HttpMethod::Get, path)).await?;
        self.serializer.deserialize(&response.body)
    }

    async fn get_list<R>(&self, path: &str) -> TransportResult<Vec<R>>
    where
        R: DeserializeOwned + Send + 'static,
    {
        let response = self.send(self.request(HttpMethod::Get, path)).await?;
        self.serializer.deserialize_list(&response.body)
    }

    async fn post_empty(&self, path: &str) -> TransportResult<()> {
        self.send(self.request(HttpMethod::Post, path)).await?;
        Ok(())
    }

    async fn post_single<R>(&self, path: &str) -> TransportResult<R>
    where
        R: DeserializeOwned + Send + 'static,
    {
        let response = self.send(self.request(HttpMethod::Post, path)).await?;
        self.serializer.deserialize(&response.body)
    }

    async fn post_with_body<B, R>(
        &self,
        path: &str,
        body: &B,
        namespace: Option<&str>,
    ) -> TransportResult<R>
    where
        B: Serialize + Sync + ?Sized,
        R: DeserializeOwned + Send + 'static,
    {
        let payload = self.serializer.serialize(body, namespace)?;
        let request = self
            .request(HttpMethod::Post, path)
            .header("Content-Type", self.serializer.content_type())
            .body(payload);
        let response = self.send(request).await?;
        self.serializer.deserialize(&response.body)
    }

    fn get_single_blocking<R>(&self, path: &str) -> TransportResult<R>
    where
        R: DeserializeOwned + Send + 'static,
    {
        self.blocking.block_on(self.get_single::<R>(path))
    }

    fn get_list_blocking<R>(&self, path: &str) -> TransportResult<Vec<R>>
    where
        R: DeserializeOwned + Send + 'static,
    {
        self.blocking.block_on(self.get_list::<R>(path))
    }

    fn post_empty_blocking(&self, path: &str) -> TransportResult<()> {
        self.blocking.block_on(self.post_empty(path))
    }

    fn post_single_blocking<R>(&self, path: &str) -> TransportResult<R>
    where
        R: DeserializeOwned + Send + 'static,
    {
        self.blocking.block_on(self.post_single::<R>(path))
    }

    fn post_with_body_blocking<B, R>(
        &self,
        path: &str,
        body: &B,
        namespace: Option<&str>,
    ) -> TransportResult<R>
    where
        B: Serialize + Sync + ?Sized,
        R: DeserializeOwned + Send + 'static,
    {
        self.blocking
            .block_on(self.post_with_body::<B, R>(path, body, namespace))
    }
}

/// Runtime driving the blocking variants, created on first use.
#[derive(Default)]
struct BlockingRuntime {
    runtime: OnceLock<Runtime>,
}

impl BlockingRuntime {
    fn block_on<F, T>(&self, fut: F) -> TransportResult<T>
    where
        F: Future<Output = TransportResult<T>>,
    {
        if Handle::try_current().is_ok() {
            return Err(TransportError::Precondition(
                "blocking call made from inside an async runtime; use the async variant".to_string(),
            ));
        }
        self.runtime()?.block_on(fut)
    }

    fn runtime(&self) -> TransportResult<&Runtime> {
        if let Some(runtime) = self.runtime.get() {
            return Ok(runtime);
        }
        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("pagewise-blocking")
            .enable_all()
            .build()
            .map_err(|e| TransportError::Configuration(format!("failed to start runtime: {e}")))?;
        // A racing caller may have won; the spare runtime is dropped outside
        // any async context.
        let _ = self.runtime.set(runtime);
        self.runtime
            .get()
            .ok_or_else(|| TransportError::Configuration("blocking runtime unavailable".to_string()))
    }
}

impl Drop for BlockingRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
