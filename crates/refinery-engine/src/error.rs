//! Pipeline error taxonomy.
//!
//! Each variant pairs with a propagation policy via [`PipelineError::classify`]:
//! schema/parse errors fail fast to the DLQ, validation-quality issues are not
//! errors at all (they travel as quality flags), transient-dependency errors
//! retry with backoff before escalating to the DLQ, and configuration errors
//! are fatal at startup.

use thiserror::Error;

use refinery_traits::TraitError;

/// Errors raised while running a pipeline worker.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The raw payload's venue has no registered parser.
    #[error("unknown venue: {0}")]
    UnknownVenue(String),

    /// Required fields were missing or mistyped.
    #[error("schema violation: {0}")]
    SchemaViolation(String),

    /// A field was present but could not be parsed.
    #[error("unparsable field {field}: {reason}")]
    UnparsableField {
        /// Field name.
        field: String,
        /// Parse failure detail.
        reason: String,
    },

    /// A dependency (reference store, cache, analytical store, bus) failed
    /// transiently; retryable with backoff.
    #[error("dependency error: {0}")]
    Dependency(#[from] TraitError),

    /// A structured deadline expired mid-processing.
    #[error("deadline exceeded")]
    Timeout,

    /// A configuration or invariant violation; fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// An internal invariant was violated; indicates a bug rather than bad input.
    #[error("internal error: {0}")]
    Internal(String),
}

/// How a [`PipelineError`] should be handled by the shared retry/DLQ helper.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ErrorDisposition {
    /// Retry in place with exponential backoff.
    Retry,
    /// Not retryable; escalate straight to the dead-letter topic.
    Dlq,
    /// Unrecoverable; the process should refuse to continue.
    Fatal,
}

impl PipelineError {
    /// Classifies this error per the shared retry/DLQ policy.
    pub fn classify(&self) -> ErrorDisposition {
        match self {
            PipelineError::UnknownVenue(_)
            | PipelineError::SchemaViolation(_)
            | PipelineError::UnparsableField { .. } => ErrorDisposition::Dlq,
            PipelineError::Dependency(e) if e.is_retryable() => ErrorDisposition::Retry,
            PipelineError::Dependency(_) => ErrorDisposition::Dlq,
            PipelineError::Timeout => ErrorDisposition::Retry,
            PipelineError::Config(_) => ErrorDisposition::Fatal,
            PipelineError::Internal(_) => ErrorDisposition::Fatal,
        }
    }

    /// Short machine-readable error class, written alongside DLQ'd payloads.
    pub fn error_class(&self) -> &'static str {
        match self {
            PipelineError::UnknownVenue(_) => "unknown_venue",
            PipelineError::SchemaViolation(_) => "schema_violation",
            PipelineError::UnparsableField { .. } => "unparsable_field",
            PipelineError::Dependency(_) => "dependency",
            PipelineError::Timeout => "timeout",
            PipelineError::Config(_) => "config",
            PipelineError::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_errors_are_not_retried() {
        let e = PipelineError::SchemaViolation("missing price".to_string());
        assert_eq!(e.classify(), ErrorDisposition::Dlq);
    }

    #[test]
    fn config_errors_are_fatal() {
        let e = PipelineError::Config("retry.max_attempts must be >= 1".to_string());
        assert_eq!(e.classify(), ErrorDisposition::Fatal);
    }

    #[test]
    fn retryable_dependency_errors_retry() {
        let e = PipelineError::Dependency(TraitError::Timeout);
        assert_eq!(e.classify(), ErrorDisposition::Retry);
    }

    #[test]
    fn non_retryable_dependency_errors_go_to_dlq() {
        let e = PipelineError::Dependency(TraitError::InvalidInput("bad key".to_string()));
        assert_eq!(e.classify(), ErrorDisposition::Dlq);
    }
}
