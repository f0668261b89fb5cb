//! Correlation id type and the policy for obtaining one.

use std::fmt;

use serde::{Deserialize, Serialize};

/// HTTP header read on inbound requests and WebSocket upgrades, and written
/// on every outbound response.
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// Tag rendered in log lines emitted outside of any unit of work.
pub const PLACEHOLDER: &str = "**";

/// Opaque token identifying one logical request chain.
///
/// Copied, never moved, into child units of work so that a request fanning
/// out into several jobs or messages stays traceable under a single id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Mint a new globally unique id (UUID v4).
    pub fn mint() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl AsRef<str> for CorrelationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Resolve the id for a new unit of work.
///
/// A non-empty inbound id is trusted and used verbatim so traces can span
/// services; no format validation happens here. Anything else gets a fresh id.
pub fn resolve(inbound: Option<&str>) -> CorrelationId {
    match inbound {
        Some(id) if !id.is_empty() => CorrelationId::from(id),
        _ => CorrelationId::mint(),
    }
}
