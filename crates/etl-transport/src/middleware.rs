//! Per-request correlation and request logging.

use std::time::Instant;

use axum::body::to_bytes;
use axum::extract::Request;
use axum::http::{HeaderValue, header};
use axum::middleware::{Next, from_fn};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use etl_protocol::{CORRELATION_ID_HEADER, ErrorBody, context, resolve};
use etl_tracing::with_correlation;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::{debug, warn};

use crate::error::panic_response;

/// Resolve the request's correlation id, run the rest of the stack as a
/// unit of work under it, and stamp it on the response.
///
/// The id is also available to handlers as `Extension<CorrelationId>`.
pub async fn correlation(mut request: Request, next: Next) -> Response {
    let id = resolve(
        request
            .headers()
            .get(CORRELATION_ID_HEADER)
            .and_then(|value| value.to_str().ok()),
    );
    request.extensions_mut().insert(id.clone());

    let mut response = with_correlation(id.clone(), next.run(request)).await;

    match HeaderValue::from_str(id.as_str()) {
        Ok(value) => {
            response.headers_mut().insert(CORRELATION_ID_HEADER, value);
        }
        Err(_) => warn!(correlation_id = %id, "Correlation id is not a valid header value"),
    }
    response
}

/// Log every request and its outcome at debug level.
pub async fn log_requests(request: Request, next: Next) -> Response {
    debug!("Request: method={} url={}", request.method(), request.uri());
    let started = Instant::now();

    let response = next.run(request).await;

    debug!(
        "Response: status={} duration_ms={:.2}",
        response.status().as_u16(),
        started.elapsed().as_secs_f64() * 1000.0
    );
    response
}

/// Largest framework error body carried over into the JSON detail.
const MAX_ERROR_DETAIL: usize = 16 * 1024;

/// Re-render error responses that bypassed [`crate::ApiError`] (extractor
/// rejections, 405s, failed upgrades) as `{ error, correlation_id }`.
pub async fn json_errors(request: Request, next: Next) -> Response {
    let response = next.run(request).await;
    let status = response.status();
    let is_json = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/json"));
    if is_json || !(status.is_client_error() || status.is_server_error()) {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let detail = match to_bytes(body, MAX_ERROR_DETAIL).await {
        Ok(bytes) if !bytes.is_empty() => String::from_utf8_lossy(&bytes).into_owned(),
        _ => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
    };
    warn!(status = status.as_u16(), "Request rejected: {detail}");

    let (json_parts, json_body) = Json(ErrorBody::new(detail, context::current_or_mint()))
        .into_response()
        .into_parts();
    parts.headers.remove(header::CONTENT_LENGTH);
    parts.headers.extend(json_parts.headers);
    Response::from_parts(parts, json_body)
}

/// Wrap `router` with the correlation stack. Outermost first: correlation,
/// request logging, JSON error rendering, panic catching.
pub fn with_correlation_layers<S>(router: Router<S>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(from_fn(json_errors))
        .layer(from_fn(log_requests))
        .layer(from_fn(correlation))
}
