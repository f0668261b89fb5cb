//! Logging injection for the correlation id.
//!
//! Every event is stamped with `[ <correlation_id> ] -` ahead of its
//! message. Units of work open a `correlation` span through
//! [`with_correlation`] (or the sync variant); the span both carries the id
//! as structured metadata and installs it in the task-local context, and its
//! exit restores whatever was active before. Events emitted outside any unit
//! of work show the `**` placeholder so the line format stays parseable.

pub mod format;
pub mod layer;
pub mod scope;
pub mod subscriber;

pub use format::CorrelationFormat;
pub use layer::CorrelationLayer;
pub use scope::{correlation_span, with_correlation, with_correlation_sync};
pub use subscriber::{LogConfig, LogFormat, build_subscriber, init};
