//! Error types for the posting pipeline.

use crate::session::SessionState;

/// Result type for posting operations.
pub type Result<T> = std::result::Result<T, PostError>;

/// Errors that can occur while building, routing, or publishing an advertisement.
#[derive(Debug, thiserror::Error)]
pub enum PostError {
    #[error("Invalid metadata for '{identifier}': {reason}")]
    InvalidMetadata { identifier: String, reason: String },

    #[error("Invalid identifier '{identifier}': {reason}")]
    InvalidIdentifier { identifier: String, reason: String },

    #[error("Content of '{path}' unavailable: {source}")]
    ContentUnavailable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("Exchange '{exchange}' declaration failed: {message}")]
    ExchangeDeclarationFailed { exchange: String, message: String },

    #[error("Exchange '{exchange}' deletion failed: {message}")]
    ExchangeDeletionFailed { exchange: String, message: String },

    #[error("Publish failed: {0}")]
    PublishFailed(String),

    #[error("Session not ready (state: {state})")]
    NotReady { state: SessionState },
}

impl PostError {
    /// True for transient broker failures that a caller may safely retry.
    ///
    /// State misuse and input validation errors never succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PostError::PublishFailed(_) | PostError::BrokerUnavailable(_))
    }

    pub(crate) fn invalid_metadata(identifier: &str, reason: impl Into<String>) -> Self {
        PostError::InvalidMetadata {
            identifier: identifier.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_identifier(identifier: &str, reason: impl Into<String>) -> Self {
        PostError::InvalidIdentifier {
            identifier: identifier.to_string(),
            reason: reason.into(),
        }
    }
}
