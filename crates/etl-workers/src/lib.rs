//! Sample consumers wired into each dispatch backend.
//!
//! These are the handlers the ping endpoint's smoke test reaches: a task
//! named `ping` and a hello-world pipeline on the task queue, a `ping`
//! function on the async queue, and an `in-topic` subscriber on the broker
//! that answers on `out-topic`.

pub mod jobs;
pub mod pipeline;
pub mod tasks;
pub mod topics;

use etl_dispatch::{Dispatchers, Subscription};
use etl_protocol::Destinations;
use tracing::info;

pub use jobs::PingJob;
pub use pipeline::{HelloWorld, PipelineRunner, PipelineTask};
pub use tasks::PingTask;
pub use topics::{InTopicPing, MessageContent};

/// Register every sample consumer with the enabled backends. Must be called
/// from within a Tokio runtime when the broker is enabled.
pub fn register(dispatchers: &Dispatchers) {
    if let Ok(queue) = dispatchers.task_queue() {
        queue.register(PingTask);
        queue.register(PipelineRunner::new(HelloWorld));
    }
    if let Ok(queue) = dispatchers.async_queue() {
        queue.register(PingJob);
    }
    if let Ok(broker) = dispatchers.broker() {
        broker.subscribe(
            Subscription::new(Destinations::PING_TOPIC).reply_to(Destinations::PING_REPLY_TOPIC),
            InTopicPing,
        );
    }
    info!(backends = ?dispatchers.enabled(), "Sample consumers registered");
}
