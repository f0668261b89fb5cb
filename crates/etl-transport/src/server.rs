//! HTTP server lifecycle and route table.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::middleware::from_fn_with_state;
use axum::routing::get;
use etl_dispatch::Dispatchers;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::config::HttpConfig;
use crate::metrics::{self, HttpMetrics, track_metrics};
use crate::middleware::with_correlation_layers;
use crate::registry::ConnectionRegistry;
use crate::{routes, ws};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid listen address: {0}")]
    Address(#[from] std::net::AddrParseError),
    #[error("failed to bind: {0}")]
    Bind(#[from] std::io::Error),
    #[error("failed to register metrics: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<HttpConfig>,
    pub dispatchers: Arc<Dispatchers>,
    pub registry: Arc<ConnectionRegistry>,
    pub metrics: Arc<HttpMetrics>,
}

impl AppState {
    pub fn new(config: HttpConfig, dispatchers: Arc<Dispatchers>) -> Result<Self, ServerError> {
        Ok(Self {
            config: Arc::new(config),
            dispatchers,
            registry: ConnectionRegistry::new(),
            metrics: Arc::new(HttpMetrics::new()?),
        })
    }
}

/// Full route table with the correlation stack applied.
///
/// Everything lives under `/api/v1`; `/ping` and `/ws` are also served at
/// the root, next to the Prometheus `/metrics` endpoint.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/ping", get(routes::ping))
        .route("/error", get(routes::error))
        .route("/tasks/{job_id}", get(routes::task_status))
        .route("/sse", get(routes::sse))
        .route("/ws", get(ws::upgrade));

    let app = Router::new()
        .nest("/api/v1", api)
        .route("/ping", get(routes::ping))
        .route("/ws", get(ws::upgrade))
        .route("/metrics", get(metrics::expose))
        .fallback(routes::not_found);

    let mut app = with_correlation_layers(app)
        .layer(from_fn_with_state(Arc::clone(&state.metrics), track_metrics));
    if state.config.enable_cors {
        app = app.layer(CorsLayer::permissive());
    }
    app.with_state(state)
}

/// A running HTTP server.
pub struct HttpServer {
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
    local_addr: SocketAddr,
}

impl HttpServer {
    pub async fn start(state: AppState) -> Result<Self, ServerError> {
        let addr: SocketAddr = format!("{}:{}", state.config.host, state.config.port).parse()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let app = router(state);

        info!("HTTP server listening on http://{local_addr}");

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                })
                .await
                .ok();
        });

        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Stop accepting connections and wait for in-flight requests.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        info!("HTTP server stopped");
    }
}
