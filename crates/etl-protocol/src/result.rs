//! Tri-state outcome reported by background tasks.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context;
use crate::correlation::CorrelationId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PipelineStatus {
    Pending,
    Success,
    Error,
}

/// Structured result of one task run.
///
/// Handler failures end up here as `ERROR` results carrying the failure
/// detail instead of surfacing as an unhandled crash in the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub status: PipelineStatus,
    pub correlation_id: CorrelationId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PipelineResult {
    pub fn pending(correlation_id: CorrelationId) -> Self {
        Self {
            status: PipelineStatus::Pending,
            correlation_id,
            data: None,
            error: None,
        }
    }

    /// Successful result under the ambient id.
    pub fn success(data: Value) -> Self {
        Self {
            status: PipelineStatus::Success,
            correlation_id: context::current_or_mint(),
            data: Some(data),
            error: None,
        }
    }

    /// Failed result under the ambient id.
    pub fn error(error: impl std::fmt::Display) -> Self {
        Self {
            status: PipelineStatus::Error,
            correlation_id: context::current_or_mint(),
            data: None,
            error: Some(error.to_string()),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == PipelineStatus::Pending
    }

    pub fn is_finished(&self) -> bool {
        !self.is_pending()
    }
}
