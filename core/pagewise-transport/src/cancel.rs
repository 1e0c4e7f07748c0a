//! Cooperative cancellation shared by a client and its in-flight calls.

use crate::error::{TransportError, TransportResult};
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// A cancellation source owned by one client instance.
///
/// Cloning yields a handle onto the same scope. [`child`](Self::child)
/// creates a scope that is cancelled with its parent but can also be
/// cancelled on its own.
#[derive(Debug, Clone, Default)]
pub struct CancellationScope {
    token: CancellationToken,
}

impl CancellationScope {
    /// Creates a fresh, unsignalled scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a scope that follows this one.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    /// Signals cancellation.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fails with [`TransportError::Cancelled`] if the scope is signalled.
    pub fn check(&self) -> TransportResult<()> {
        if self.is_cancelled() {
            Err(TransportError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Completes once the scope is signalled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Runs `fut` until it completes or the scope is signalled.
    ///
    /// Cancellation wins ties, so a scope signalled before the first poll never
    /// lets the future start.
    pub async fn run<F, T>(&self, fut: F) -> TransportResult<T>
    where
        F: Future<Output = TransportResult<T>>,
    {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(TransportError::Cancelled),
            result = fut => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_follows_parent() {
        let parent = CancellationScope::new();
        let child = parent.child();
        assert!(!child.is_cancelled());
        parent.cancel();
        assert!(child.is_cancelled());
        assert!(child.check().is_err());
    }

    #[test]
    fn child_cancel_leaves_parent() {
        let parent = CancellationScope::new();
        let child = parent.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn run_short_circuits_when_signalled() {
        let scope = CancellationScope::new();
        scope.cancel();
        let result: TransportResult<u8> = scope.run(async { Ok(1) }).await;
        assert!(matches!(result, Err(TransportError::Cancelled)));
    }

    #[tokio::test]
    async fn run_returns_value() {
        let scope = CancellationScope::new();
        assert_eq!(scope.run(async { Ok(7) }).await.unwrap(), 7);
    }
}
