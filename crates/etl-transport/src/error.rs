//! Central error conversion for HTTP handlers.

use std::any::Any;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use etl_dispatch::DispatchError;
use etl_protocol::{ErrorBody, context};
use tracing::{error, warn};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::Internal(detail.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Dispatch(err) if err.is_unavailable() => StatusCode::SERVICE_UNAVAILABLE,
            Self::Dispatch(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Renders `{ "error": <detail>, "correlation_id": <id> }` using the id of
/// the request being served.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), "Request failed: {self}");
        } else {
            warn!(status = status.as_u16(), "Request rejected: {self}");
        }
        let body = ErrorBody::new(self.to_string(), context::current_or_mint());
        (status, Json(body)).into_response()
    }
}

/// Panic handler for `CatchPanicLayer`: a panicking handler becomes a JSON 500.
pub(crate) fn panic_response(payload: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    error!("Handler panicked: {detail}");
    ApiError::Internal(detail).into_response()
}
