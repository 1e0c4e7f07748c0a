//! The operation set every backend provides.

use crate::error::TransportResult;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Typed calls against the data service.
///
/// Each operation comes in an async, cancellable form and a blocking form.
/// The blocking forms run the async ones to completion and must not be
/// called from inside an async runtime.
#[async_trait]
pub trait DataTransport: Send + Sync {
    /// GETs `path` and decodes one value.
    async fn get_single<R>(&self, path: &str) -> TransportResult<R>
    where
        R: DeserializeOwned + Send + 'static;

    /// GETs `path` and decodes a sequence.
    async fn get_list<R>(&self, path: &str) -> TransportResult<Vec<R>>
    where
        R: DeserializeOwned + Send + 'static;

    /// POSTs to `path` without a body, ignoring the response body.
    async fn post_empty(&self, path: &str) -> TransportResult<()>;

    /// POSTs to `path` without a body and decodes the response.
    async fn post_single<R>(&self, path: &str) -> TransportResult<R>
    where
        R: DeserializeOwned + Send + 'static;

    /// POSTs `body` to `path` and decodes the response.
    ///
    /// `namespace` overrides the configured default XML namespace.
    async fn post_with_body<B, R>(
        &self,
        path: &str,
        body: &B,
        namespace: Option<&str>,
    ) -> TransportResult<R>
    where
        B: Serialize + Sync + ?Sized,
        R: DeserializeOwned + Send + 'static;

    /// Blocking [`get_single`](Self::get_single).
    fn get_single_blocking<R>(&self, path: &str) -> TransportResult<R>
    where
        R: DeserializeOwned + Send + 'static;

    /// Blocking [`get_list`](Self::get_list).
    fn get_list_blocking<R>(&self, path: &str) -> TransportResult<Vec<R>>
    where
        R: DeserializeOwned + Send + 'static;

    /// Blocking [`post_empty`](Self::post_empty).
    fn post_empty_blocking(&self, path: &str) -> TransportResult<()>;

    /// Blocking [`post_single`](Self::post_single).
    fn post_single_blocking<R>(&self, path: &str) -> TransportResult<R>
    where
        R: DeserializeOwned + Send + 'static;

    /// Blocking [`post_with_body`](Self::post_with_body).
    fn post_with_body_blocking<B, R>(
        &self,
        path: &str,
        body: &B,
        namespace: Option<&str>,
    ) -> TransportResult<R>
    where
        B: Serialize + Sync + ?Sized,
        R: DeserializeOwned + Send + 'static;
}
