//! Handler traits for queued work and topic messages.
//!
//! Both traits use return-position `impl Future` so implementors can write
//! plain `async fn`. Queues and brokers store them behind the object-safe
//! `*Dyn` twins.

use std::future::Future;
use std::pin::Pin;

use etl_protocol::{Envelope, HandlerError};
use serde_json::Value;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A named unit of queued work: a task-queue task or an async-queue job.
pub trait TaskHandler: Send + Sync {
    /// Name producers address this handler by.
    fn name(&self) -> &str;

    /// Execute with the envelope payload. Runs inside the job's correlation
    /// scope, so any log line it emits carries the producer's id.
    fn handle(&self, payload: Value) -> impl Future<Output = Result<Value, HandlerError>> + Send;
}

/// Consumer of a broker topic.
pub trait TopicHandler: Send + Sync {
    /// Handle one message. `Some(reply)` is published to the subscription's
    /// reply topic, if it has one.
    fn handle(
        &self,
        message: Envelope<Value>,
    ) -> impl Future<Output = Result<Option<Envelope<Value>>, HandlerError>> + Send;
}

/// Object-safe wrapper for [`TaskHandler`].
pub(crate) trait TaskHandlerDyn: Send + Sync {
    fn name_dyn(&self) -> &str;
    fn handle_dyn(&self, payload: Value) -> BoxFuture<'_, Result<Value, HandlerError>>;
}

impl<T: TaskHandler> TaskHandlerDyn for T {
    fn name_dyn(&self) -> &str {
        self.name()
    }
    fn handle_dyn(&self, payload: Value) -> BoxFuture<'_, Result<Value, HandlerError>> {
        Box::pin(self.handle(payload))
    }
}

/// Object-safe wrapper for [`TopicHandler`].
pub(crate) trait TopicHandlerDyn: Send + Sync {
    fn handle_dyn(
        &self,
        message: Envelope<Value>,
    ) -> BoxFuture<'_, Result<Option<Envelope<Value>>, HandlerError>>;
}

impl<T: TopicHandler> TopicHandlerDyn for T {
    fn handle_dyn(
        &self,
        message: Envelope<Value>,
    ) -> BoxFuture<'_, Result<Option<Envelope<Value>>, HandlerError>> {
        Box::pin(self.handle(message))
    }
}

// ── Closure adapters ─────────────────────────────────────────────────────────

/// [`TaskHandler`] built from an async closure. See [`task_fn`].
pub struct FnTask<F> {
    name: String,
    f: F,
}

/// Wrap `f` as a task named `name`.
pub fn task_fn<F, Fut>(name: impl Into<String>, f: F) -> FnTask<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send,
{
    FnTask {
        name: name.into(),
        f,
    }
}

impl<F, Fut> TaskHandler for FnTask<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&self, payload: Value) -> impl Future<Output = Result<Value, HandlerError>> + Send {
        (self.f)(payload)
    }
}

/// [`TopicHandler`] built from an async closure. See [`topic_fn`].
pub struct FnTopic<F>(F);

pub fn topic_fn<F, Fut>(f: F) -> FnTopic<F>
where
    F: Fn(Envelope<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<Envelope<Value>>, HandlerError>> + Send,
{
    FnTopic(f)
}

impl<F, Fut> TopicHandler for FnTopic<F>
where
    F: Fn(Envelope<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<Envelope<Value>>, HandlerError>> + Send,
{
    fn handle(
        &self,
        message: Envelope<Value>,
    ) -> impl Future<Output = Result<Option<Envelope<Value>>, HandlerError>> + Send {
        (self.0)(message)
    }
}
