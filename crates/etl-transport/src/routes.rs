//! HTTP handlers.

use std::convert::Infallible;
use std::time::Duration;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::Uri;
use axum::response::sse::{Event, KeepAlive, Sse};
use etl_dispatch::{Ack, Backend, DispatchError, Dispatchers};
use etl_protocol::{Destinations, PipelineResult};
use futures_util::Stream;
use futures_util::stream;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::error::ApiError;
use crate::server::AppState;

/// Liveness check. Also pushes a sample message through every enabled
/// backend; dispatch failures are logged and do not affect the response.
pub(crate) async fn ping(State(state): State<AppState>) -> Json<Value> {
    for backend in state.dispatchers.enabled() {
        report(dispatch_sample(&state.dispatchers, backend).await);
    }

    info!("Sample logging from ping api");
    debug!("Ping request received");
    Json(json!({ "version": state.config.version, "message": "pong" }))
}

async fn dispatch_sample(dispatchers: &Dispatchers, backend: Backend) -> Result<Ack, DispatchError> {
    match backend {
        Backend::Broker => {
            let message = json!({
                "message": "Send for in-topic",
                "timestamp": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            });
            dispatchers
                .send_payload(backend, Destinations::PING_TOPIC, message)
                .await
        }
        Backend::TaskQueue => {
            dispatchers
                .send_payload(backend, Destinations::PING_TASK, json!({}))
                .await
        }
        Backend::AsyncQueue => {
            dispatchers
                .send_payload(backend, Destinations::PING_JOB, json!({}))
                .await
        }
    }
}

fn report(result: Result<Ack, DispatchError>) {
    match result {
        Ok(ack) => info!(
            backend = %ack.backend,
            destination = %ack.destination,
            message_id = %ack.message_id,
            "Sample message dispatched"
        ),
        Err(err) => error!("Failed to dispatch sample message: {err}"),
    }
}

/// Always fails; exercises the error path.
pub(crate) async fn error() -> Result<Json<Value>, ApiError> {
    Err(ApiError::internal("unhandled error"))
}

/// Task-queue result for `job_id`.
pub(crate) async fn task_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<PipelineResult>, ApiError> {
    state
        .dispatchers
        .task_queue()?
        .result(&job_id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("unknown job {job_id}")))
}

pub(crate) async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(format!("no route for {}", uri.path()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Server-sent events
// ─────────────────────────────────────────────────────────────────────────────

const SSE_RETRY: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
pub(crate) struct SseParams {
    #[serde(default = "default_max_second")]
    max_second: u64,
    #[serde(default = "default_period")]
    period: u64,
}

fn default_max_second() -> u64 {
    5
}

fn default_period() -> u64 {
    1
}

/// Emits `data` events with the elapsed time every `period` seconds for
/// `max_second` seconds, then a single `eol` event.
pub(crate) async fn sse(
    Query(params): Query<SseParams>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let max = Duration::from_secs(params.max_second);
    let period = Duration::from_secs(params.period.max(1));
    let started = Instant::now();

    let events = stream::unfold(Some(0u64), move |counter| async move {
        let counter = counter?;
        if counter > 0 {
            tokio::time::sleep(period).await;
        }

        let elapsed = started.elapsed();
        let event = Event::default().id(counter.to_string()).retry(SSE_RETRY);
        if elapsed < max {
            let data = json!({ "elapsed_seconds": format!("{}s", elapsed.as_secs()) });
            Some((Ok(event.event("data").data(data.to_string())), Some(counter + 1)))
        } else {
            Some((Ok(event.event("eol").data("eol")), None))
        }
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}
