//! Dispatch errors.

use etl_protocol::HandlerError;

use crate::adapter::Backend;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("{backend} is disabled: {reason}")]
    Disabled { backend: Backend, reason: String },

    #[error("{backend} transport unavailable: {reason}")]
    Unavailable { backend: Backend, reason: String },

    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("job {job_id} failed: {source}")]
    JobFailed {
        job_id: String,
        #[source]
        source: HandlerError,
    },

    #[error("job {job_id} was dropped before producing a result")]
    ResultDropped { job_id: String },
}

impl DispatchError {
    pub(crate) fn closed(backend: Backend) -> Self {
        Self::Unavailable {
            backend,
            reason: "shut down".into(),
        }
    }

    /// Backend is switched off or cannot accept work right now.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Disabled { .. } | Self::Unavailable { .. })
    }
}
