//! HTTP and WebSocket surface.
//!
//! Every request runs as a unit of work under its correlation id: the
//! [`middleware::correlation`] layer resolves the id from `x-correlation-id`
//! (or mints one), scopes the handler under it and stamps it back on the
//! response, error and panic responses included. Request counts and
//! latencies are exported in Prometheus format at `/metrics`.

pub mod config;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod registry;
mod routes;
pub mod server;
mod ws;

pub use config::HttpConfig;
pub use error::ApiError;
pub use metrics::HttpMetrics;
pub use middleware::with_correlation_layers;
pub use registry::{ConnectionGuard, ConnectionRegistry, RegistryError};
pub use server::{AppState, HttpServer, ServerError, router};
