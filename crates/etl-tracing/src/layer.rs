//! Layer that remembers the `correlation_id` field of each span.
//!
//! The fmt layer only keeps span fields as pre-rendered text, so the id is
//! copied into span extensions where the event formatter can read it back.

use std::fmt;

use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::Subscriber;
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::{LookupSpan, SpanRef};

/// Span field name carrying the correlation id.
pub const CORRELATION_FIELD: &str = "correlation_id";

#[derive(Debug, Clone)]
struct SpanCorrelation(String);

#[derive(Default)]
struct CorrelationVisitor(Option<String>);

impl Visit for CorrelationVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == CORRELATION_FIELD {
            self.0 = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == CORRELATION_FIELD {
            self.0 = Some(format!("{value:?}"));
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CorrelationLayer;

impl CorrelationLayer {
    fn store<S>(id: &Id, visitor: CorrelationVisitor, ctx: &Context<'_, S>)
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
    {
        let (Some(value), Some(span)) = (visitor.0, ctx.span(id)) else {
            return;
        };
        span.extensions_mut().replace(SpanCorrelation(value));
    }
}

impl<S> Layer<S> for CorrelationLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let mut visitor = CorrelationVisitor::default();
        attrs.record(&mut visitor);
        Self::store(id, visitor, &ctx);
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        let mut visitor = CorrelationVisitor::default();
        values.record(&mut visitor);
        Self::store(id, visitor, &ctx);
    }
}

/// The correlation id recorded on `span`, if it carried one.
pub(crate) fn span_correlation<'a, R>(span: &SpanRef<'a, R>) -> Option<String>
where
    R: LookupSpan<'a>,
{
    span.extensions()
        .get::<SpanCorrelation>()
        .map(|c| c.0.clone())
}
