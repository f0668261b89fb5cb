//! Ambient correlation context, one slot per unit of work.
//!
//! Backed by a tokio task-local: every HTTP request, consumed job, delivered
//! message and WebSocket connection runs inside its own [`scope`], so
//! concurrent units never observe each other's id. A scope ends when its
//! future (or closure) finishes, which is what keeps a reused worker task
//! from inheriting a stale id.
//!
//! Plain `tokio::spawn` does not carry task-locals across; use [`spawn`] to
//! copy the current id into a child task.

use std::cell::RefCell;
use std::future::Future;

use tokio::task::JoinHandle;

use crate::correlation::CorrelationId;

tokio::task_local! {
    static CORRELATION_ID: RefCell<Option<CorrelationId>>;
}

/// The id of the unit of work currently executing, if any.
pub fn current() -> Option<CorrelationId> {
    CORRELATION_ID
        .try_with(|slot| slot.borrow().clone())
        .ok()
        .flatten()
}

/// Replace the id for the rest of the current unit of work.
///
/// Returns `false` when called outside any scope, in which case nothing is
/// stored.
pub fn set(id: CorrelationId) -> bool {
    CORRELATION_ID
        .try_with(|slot| {
            *slot.borrow_mut() = Some(id);
        })
        .is_ok()
}

/// The current id, or a freshly minted one when no unit of work is active.
pub fn current_or_mint() -> CorrelationId {
    current().unwrap_or_else(CorrelationId::mint)
}

/// Run `future` as a unit of work with `id` installed.
pub async fn scope<F>(id: CorrelationId, future: F) -> F::Output
where
    F: Future,
{
    CORRELATION_ID.scope(RefCell::new(Some(id)), future).await
}

/// Synchronous counterpart of [`scope`].
pub fn sync_scope<R>(id: CorrelationId, f: impl FnOnce() -> R) -> R {
    CORRELATION_ID.sync_scope(RefCell::new(Some(id)), f)
}

/// Spawn a child task that inherits a copy of the current id.
///
/// Outside of any scope the child runs without an id, exactly like its parent.
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    match current() {
        Some(id) => tokio::spawn(scope(id, future)),
        None => tokio::spawn(future),
    }
}
