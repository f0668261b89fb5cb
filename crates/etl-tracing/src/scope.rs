//! Scoped correlation for a unit of work.

use std::future::Future;

use etl_protocol::{CorrelationId, context};
use tracing::{Instrument, Span};

/// Span carrying `correlation_id` as structured metadata.
pub fn correlation_span(id: &CorrelationId) -> Span {
    tracing::info_span!("correlation", correlation_id = %id)
}

/// Run `future` as a unit of work under `id`.
///
/// Installs the id in the task-local context and instruments the future
/// with a [`correlation_span`]. Both are undone when the future completes,
/// whether it returns `Ok`, `Err`, or is dropped mid-flight.
pub async fn with_correlation<F>(id: CorrelationId, future: F) -> F::Output
where
    F: Future,
{
    let span = correlation_span(&id);
    context::scope(id, future.instrument(span)).await
}

/// Synchronous counterpart of [`with_correlation`]; also restores on unwind.
pub fn with_correlation_sync<R>(id: CorrelationId, f: impl FnOnce() -> R) -> R {
    let span = correlation_span(&id);
    context::sync_scope(id, || span.in_scope(f))
}
