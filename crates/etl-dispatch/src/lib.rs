//! Correlation-aware dispatch to background backends.
//!
//! Three adapters share one contract ([`DispatchAdapter`]): a fire-and-forget
//! [`TaskQueue`] with a result store, an [`AsyncQueue`] whose jobs can be
//! awaited, and a topic [`Broker`]. Each carries the caller's correlation id
//! inside the [`etl_protocol::Envelope`] and re-establishes it around the
//! consuming handler.

pub mod adapter;
pub mod async_queue;
pub mod broker;
pub mod config;
pub mod error;
pub mod factory;
pub mod handler;
mod retry;
pub mod task_queue;
mod worker;

pub use adapter::{Ack, Backend, DispatchAdapter, DispatchAdapterDyn};
pub use async_queue::{AsyncQueue, JobHandle};
pub use broker::{Broker, Subscription};
pub use config::{BackendConfig, DispatchConfig, Endpoint, FailurePolicy, MEMORY_SCHEME};
pub use error::DispatchError;
pub use factory::Dispatchers;
pub use handler::{FnTask, FnTopic, TaskHandler, TopicHandler, task_fn, topic_fn};
pub use task_queue::TaskQueue;
