//! Job/message envelope carried across every dispatch boundary.
//!
//! Wire shape: `{ "correlation_id": string, "data": <payload> | null, "status"?: MessageStatus }`.

use serde::{Deserialize, Serialize};

use crate::context;
use crate::correlation::CorrelationId;

/// Processing state of a message as reported by the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageStatus {
    Received,
    Processing,
    Completed,
    Failed,
    Retrying,
    Cancelled,
    Partially,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "Received",
            Self::Processing => "Processing",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Retrying => "Retrying",
            Self::Cancelled => "Cancelled",
            Self::Partially => "Partially",
        }
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wrapper owning the correlation id and status of a domain payload.
///
/// Constructors that do not take an explicit id inherit the ambient one, so
/// an envelope built inside a handler automatically carries the id of the
/// request that triggered it. Decoding a message whose producer left the id
/// out falls back the same way (minting when no context is active).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    #[serde(default = "context::current_or_mint")]
    pub correlation_id: CorrelationId,
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MessageStatus>,
}

impl<T> Envelope<T> {
    /// Wrap `data` under the ambient id.
    pub fn new(data: T) -> Self {
        Self {
            correlation_id: context::current_or_mint(),
            data: Some(data),
            status: None,
        }
    }

    /// An envelope with no payload under the ambient id.
    pub fn empty() -> Self {
        Self {
            correlation_id: context::current_or_mint(),
            data: None,
            status: None,
        }
    }

    pub fn with_correlation_id(correlation_id: CorrelationId, data: T) -> Self {
        Self {
            correlation_id,
            data: Some(data),
            status: None,
        }
    }

    pub fn with_status(mut self, status: MessageStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Build a reply that carries this envelope's id forward.
    pub fn reply<U>(&self, data: U, status: MessageStatus) -> Envelope<U> {
        Envelope {
            correlation_id: self.correlation_id.clone(),
            data: Some(data),
            status: Some(status),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Envelope<U> {
        Envelope {
            correlation_id: self.correlation_id,
            data: self.data.map(f),
            status: self.status,
        }
    }
}

impl<T> Default for Envelope<T> {
    fn default() -> Self {
        Self::empty()
    }
}
