//! Subscriber bootstrap.

use std::str::FromStr;

use tracing::Subscriber;
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::EnvFilter;

use crate::format::CorrelationFormat;
use crate::layer::CorrelationLayer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// `ts LEVEL target - [ id ] - message`
    #[default]
    Text,
    /// One JSON object per event, correlation id in the span list.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format: {other} (expected text or json)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// `EnvFilter` directive, e.g. `info` or `etl_dispatch=debug,info`.
    pub level: String,
    pub format: LogFormat,
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Text,
            ansi: true,
        }
    }
}

/// Build a correlation-aware subscriber writing to `writer`.
pub fn build_subscriber<W>(config: &LogConfig, writer: W) -> Box<dyn Subscriber + Send + Sync>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));
    build_with_filter(filter, config, writer)
}

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
pub fn init(config: &LogConfig) -> Result<(), TryInitError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info")),
    };
    build_with_filter(filter, config, std::io::stderr).try_init()
}

fn build_with_filter<W>(
    filter: EnvFilter,
    config: &LogConfig,
    writer: W,
) -> Box<dyn Subscriber + Send + Sync>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(CorrelationLayer);

    match config.format {
        LogFormat::Text => Box::new(
            registry.with(
                fmt::layer()
                    .event_format(CorrelationFormat::new())
                    .with_ansi(config.ansi)
                    .with_writer(writer),
            ),
        ),
        LogFormat::Json => Box::new(
            registry.with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_writer(writer),
            ),
        ),
    }
}
