//! ETL agent protocol types.
//!
//! The single source of truth for what crosses a boundary: the correlation
//! id and how it is resolved, the task-local correlation context, the
//! job/message envelope, pipeline results, destination names, and the JSON
//! error body returned to HTTP clients.

pub mod context;
pub mod correlation;
pub mod destinations;
pub mod envelope;
pub mod error;
pub mod result;

pub use correlation::{CORRELATION_ID_HEADER, CorrelationId, PLACEHOLDER, resolve};
pub use destinations::Destinations;
pub use envelope::{Envelope, MessageStatus};
pub use error::{ErrorBody, HandlerError};
pub use result::{PipelineResult, PipelineStatus};
