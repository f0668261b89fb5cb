//! Text event format with the correlation tag ahead of the message.
//!
//! `2026-10-17T09:12:44.031Z  INFO etl_transport::routes - [ abc-123 ] - Sample logging from ping api`

use std::fmt;

use etl_protocol::{PLACEHOLDER, context};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

use crate::layer::span_correlation;

#[derive(Debug, Clone, Copy)]
pub struct CorrelationFormat {
    display_target: bool,
}

impl CorrelationFormat {
    pub fn new() -> Self {
        Self { display_target: true }
    }

    pub fn with_target(mut self, display_target: bool) -> Self {
        self.display_target = display_target;
        self
    }
}

impl Default for CorrelationFormat {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, N> FormatEvent<S, N> for CorrelationFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();
        let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);

        write!(writer, "{now} {:>5} ", meta.level())?;
        if self.display_target {
            write!(writer, "{} ", meta.target())?;
        }
        write!(writer, "- [ {} ] - ", correlation_tag(ctx))?;

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Task-local id first, then the innermost span carrying one, else `**`.
fn correlation_tag<S, N>(ctx: &FmtContext<'_, S, N>) -> String
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    if let Some(id) = context::current() {
        return id.into_inner();
    }

    ctx.event_scope()
        .and_then(|scope| scope.into_iter().find_map(|span| span_correlation(&span)))
        .unwrap_or_else(|| PLACEHOLDER.to_string())
}
