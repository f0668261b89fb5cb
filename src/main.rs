//! etl-agent: HTTP front end for the ETL agent with correlation-aware
//! background dispatch.
//!
//! Every request, WebSocket connection, queued task and broker message runs
//! as a unit of work tagged with a correlation id, so one request can be
//! traced through every backend it fans out to.
//!
//! Usage:
//!   etl-agent                                          # port 8080, no backends
//!   etl-agent --celery-enable \
//!       --celery-broker-url memory://celery \
//!       --celery-backend-url memory://results          # task queue on
//!   SAQ_ENABLE=true REDIS_URL=memory://saq etl-agent   # async queue on

use std::sync::Arc;

use anyhow::Context;
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};
use etl_dispatch::{BackendConfig, DispatchConfig, Dispatchers, FailurePolicy};
use etl_tracing::{LogConfig, LogFormat};
use etl_transport::{AppState, HttpConfig, HttpServer};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "etl-agent", about = "ETL agent API with correlated background dispatch")]
struct Cli {
    /// Version reported by the ping endpoint
    #[arg(long, env = "APP_VERSION", default_value = "1.0.0")]
    app_version: String,

    /// Port to listen on (0 for OS-assigned)
    #[arg(long, env = "APP_PORT", default_value = "8080")]
    port: u16,

    /// Address to bind to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Allow cross-origin requests
    #[arg(
        long,
        env = "ENABLE_CORS",
        action = ArgAction::Set,
        num_args = 0..=1,
        default_value = "false",
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    enable_cors: bool,

    /// Log filter, e.g. `info` or `etl_dispatch=debug,info` (RUST_LOG wins)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// `text` or `json`
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,

    // ── Task queue ──────────────────────────────────────────────────────
    #[arg(
        long,
        env = "CELERY_ENABLE",
        action = ArgAction::Set,
        num_args = 0..=1,
        default_value = "false",
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    celery_enable: bool,

    #[arg(long, env = "CELERY_BROKER_URL")]
    celery_broker_url: Option<String>,

    #[arg(long, env = "CELERY_BACKEND_URL")]
    celery_backend_url: Option<String>,

    #[arg(long, env = "CELERY_DEFAULT_QUEUE", default_value = "celery")]
    celery_default_queue: String,

    #[arg(long, env = "CELERY_WORKERS", default_value = "1")]
    celery_workers: usize,

    /// `report`, `retry` or `retry:N`
    #[arg(long, env = "CELERY_FAILURE_POLICY", default_value = "report")]
    celery_failure_policy: FailurePolicy,

    /// Task results kept for `/api/v1/tasks/{job_id}`; oldest evicted first
    #[arg(long, env = "CELERY_RESULT_CAPACITY", default_value = "10000")]
    celery_result_capacity: usize,

    // ── Async queue ─────────────────────────────────────────────────────
    #[arg(
        long,
        env = "SAQ_ENABLE",
        action = ArgAction::Set,
        num_args = 0..=1,
        default_value = "false",
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    saq_enable: bool,

    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    #[arg(long, env = "SAQ_WORKERS", default_value = "10")]
    saq_workers: usize,

    /// `report`, `retry` or `retry:N`
    #[arg(long, env = "SAQ_FAILURE_POLICY", default_value = "report")]
    saq_failure_policy: FailurePolicy,

    // ── Broker ──────────────────────────────────────────────────────────
    #[arg(
        long,
        env = "FASTSTREAM_ENABLE",
        action = ArgAction::Set,
        num_args = 0..=1,
        default_value = "false",
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    faststream_enable: bool,

    /// Broker URL
    #[arg(long, env = "FASTSTREAM_PROVIDER")]
    faststream_provider: Option<String>,
}

impl Cli {
    fn log_config(&self) -> LogConfig {
        LogConfig {
            level: self.log_level.clone(),
            format: self.log_format,
            ansi: true,
        }
    }

    fn http_config(&self) -> HttpConfig {
        HttpConfig {
            host: self.host.clone(),
            port: self.port,
            version: self.app_version.clone(),
            enable_cors: self.enable_cors,
        }
    }

    fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            task_queue: BackendConfig::new(self.celery_enable, &self.celery_default_queue)
                .endpoint("CELERY_BROKER_URL", self.celery_broker_url.clone())
                .endpoint("CELERY_BACKEND_URL", self.celery_backend_url.clone())
                .workers(self.celery_workers)
                .failure_policy(self.celery_failure_policy)
                .result_capacity(self.celery_result_capacity),
            async_queue: BackendConfig::new(self.saq_enable, "default")
                .endpoint("REDIS_URL", self.redis_url.clone())
                .workers(self.saq_workers)
                .failure_policy(self.saq_failure_policy),
            broker: BackendConfig::new(self.faststream_enable, "faststream")
                .endpoint("FASTSTREAM_PROVIDER", self.faststream_provider.clone()),
        }
    }
}

fn enabled_label(dispatchers: &Dispatchers, backend: etl_dispatch::Backend) -> String {
    match dispatchers.disabled_reason(backend) {
        None => "enabled".into(),
        Some(reason) => format!("disabled ({reason})"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    etl_tracing::init(&cli.log_config()).context("failed to install log subscriber")?;

    let dispatchers = Arc::new(Dispatchers::from_config(&cli.dispatch_config()));
    etl_workers::register(&dispatchers);
    dispatchers.start();

    let state = AppState::new(cli.http_config(), Arc::clone(&dispatchers))
        .context("failed to build application state")?;
    let mut server = HttpServer::start(state)
        .await
        .context("failed to start HTTP server")?;

    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                          ETL Agent                          ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!("  Version:      {}", cli.app_version);
    println!("  HTTP:         http://{}", server.local_addr());
    println!("  WebSocket:    ws://{}/api/v1/ws", server.local_addr());
    println!();
    for backend in etl_dispatch::Backend::ALL {
        println!("  {:<13} {}", format!("{backend}:"), enabled_label(&dispatchers, backend));
    }
    println!();
    println!("  Press Ctrl+C to stop.");
    println!();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    info!("Shutting down");
    server.stop().await;
    dispatchers.shutdown();
    println!("  Server stopped.");
    Ok(())
}
