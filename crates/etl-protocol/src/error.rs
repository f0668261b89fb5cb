//! Error types shared across crates.

use serde::{Deserialize, Serialize};

use crate::correlation::CorrelationId;

/// Failure raised by a task, job or topic handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("no handler registered for '{0}'")]
    NotFound(String),
    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::InvalidPayload(message.into())
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Whether running the handler again could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidPayload(err.to_string())
    }
}

/// JSON body of every error response sent to an HTTP client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: serde_json::Value,
    pub correlation_id: CorrelationId,
}

impl ErrorBody {
    pub fn new(error: impl Into<serde_json::Value>, correlation_id: CorrelationId) -> Self {
        Self {
            error: error.into(),
            correlation_id,
        }
    }
}
