//! Error types for trait operations (event bus, analytical store, reference
//! store, hot cache).

use thiserror::Error;

/// Common error type returned by capability trait implementations.
#[derive(Debug, Error)]
pub enum TraitError {
    /// Connection to an external service failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation timed out.
    #[error("timeout")]
    Timeout,

    /// Parse/deserialization error.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Database/store error.
    #[error("database error: {0}")]
    DatabaseError(String),

    /// Invalid input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Producer acknowledgement failed or was never received.
    #[error("publish not acked: {0}")]
    PublishFailed(String),

    /// A transient dependency error, retryable per the shared retry policy.
    #[error("transient error: {0}")]
    Transient(String),
}

impl TraitError {
    /// Whether this error class is safe to retry with backoff, per the
    /// transient-dependency-errors policy.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TraitError::ConnectionFailed(_)
                | TraitError::Timeout
                | TraitError::Transient(_)
                | TraitError::PublishFailed(_)
        )
    }
}
