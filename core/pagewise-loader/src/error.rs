//! Error types for the loader and repository.

use pagewise_transport::TransportError;
use thiserror::Error;

/// Result type for loader operations.
pub type LoaderResult<T> = Result<T, LoaderError>;

/// Errors raised while querying or writing through an [`EntityLoader`](crate::EntityLoader).
#[derive(Debug, Error)]
pub enum LoaderError {
    /// A required argument or collaborator is missing.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// The transport failed.
    #[error("transport error: {0}")]
    Transport(TransportError),

    /// The loader's cancellation scope was signalled.
    #[error("operation aborted")]
    Aborted,

    /// The context holds no entry for the identity.
    #[error("entity is not tracked: {0}")]
    NotTracked(String),

    /// The context already holds an entry for the identity.
    #[error("entity is already tracked: {0}")]
    AlreadyTracked(String),

    /// No server entity matches the key.
    #[error("{entity_type} not found for key {key}")]
    NotFound { entity_type: String, key: String },

    /// A write conflict survived the single resubmission.
    #[error("concurrency conflict on {entity_type} (status {status}): {message}")]
    Conflict {
        entity_type: String,
        status: u16,
        message: String,
    },

    /// The server rejected a write with 412 or 409.
    #[error("server reported a conflict (status {status}): {body}")]
    ConflictDetected { status: u16, body: String },

    /// A response did not have the expected shape.
    #[error("unexpected payload: {0}")]
    Payload(String),

    /// An entity could not be converted to or from JSON.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A write operation failed; `source` holds the cause.
    #[error("{operation} failed for {entity_type}: {source}")]
    Write {
        operation: &'static str,
        entity_type: String,
        #[source]
        source: Box<LoaderError>,
    },
}

impl From<TransportError> for LoaderError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Cancelled => LoaderError::Aborted,
            other => LoaderError::Transport(other),
        }
    }
}

impl LoaderError {
    /// Returns true for a write conflict, raw or after resubmission.
    pub fn is_conflict(&self) -> bool {
        match self {
            LoaderError::Conflict { .. } | LoaderError::ConflictDetected { .. } => true,
            LoaderError::Write { source, .. } => source.is_conflict(),
            _ => false,
        }
    }

    /// Returns true if the operation stopped because of cancellation.
    pub fn is_aborted(&self) -> bool {
        match self {
            LoaderError::Aborted => true,
            LoaderError::Write { source, .. } => source.is_aborted(),
            _ => false,
        }
    }
}
