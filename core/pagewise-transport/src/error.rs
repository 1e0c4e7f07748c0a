//! Error types for the transport layer.

use thiserror::Error;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors that can occur while talking to the data service.
///
/// Library errors raised by the HTTP stacks never cross this boundary: they
/// are flattened into [`TransportError::Network`] first.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Unhandled backend kind or message format, or an unusable configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A required argument or dependency is missing.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// The server answered with a non-success status.
    #[error("request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body could not be decoded into the requested type.
    #[error("deserialization error: {0}")]
    Deserialize(String),

    /// The request body could not be encoded.
    #[error("serialization error: {0}")]
    Serialize(String),

    /// The network call failed. Holds the joined cause chain.
    #[error("network error: {0}")]
    Network(String),

    /// The call did not complete within the configured timeout.
    #[error("request timed out after {0}s")]
    Timeout(u64),

    /// The cancellation scope was signalled.
    #[error("operation cancelled")]
    Cancelled,

    /// The settings store could not be read or written.
    #[error("settings error: {0}")]
    Settings(String),
}

impl TransportError {
    /// Returns the HTTP status if this error came from a non-success response.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns true if the call was abandoned because of cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransportError::Cancelled)
    }
}

/// Joins an error and every error in its `source()` chain, one per line.
///
/// Intermediate causes are kept even when they repeat part of an outer
/// message, so nothing is lost when a library error is converted into
/// [`TransportError::Network`].
pub fn flatten_error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut messages = vec![error.to_string()];
    let mut source = error.source();
    while let Some(cause) = source {
        messages.push(cause.to_string());
        source = cause.source();
    }
    messages.join("\n")
}
