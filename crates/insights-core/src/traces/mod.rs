//! Spans started from an ambient [`Context`].
//!
//! A span's attributes are the tracer's accumulated attributes with the
//! per-call attributes layered on top. When tracing is off, or its exporter
//! cannot be built, the [`NopTracer`] takes over and every call is free.

pub mod nop;
pub mod otel;

use std::error::Error;
use std::sync::Arc;

use crate::attrs::{AttrMap, Attributable};

pub use nop::{NopSpan, NopTracer};
pub use opentelemetry::Context;
pub use otel::{OtelSpan, OtelTracer, OtelTracerConfig};

/// Produces a fresh tracer for each unit of work.
pub type TracerBuilder = Arc<dyn Fn() -> Box<dyn Tracer> + Send + Sync>;

pub trait Tracer: Attributable + Send + Sync {
    /// Start a span as a child of whatever span `parent` carries.
    fn start(&self, parent: &Context, name: &str, attrs: Option<&AttrMap>) -> Box<dyn Span>;

    /// Snapshot of the accumulated attributes.
    fn attrs(&self) -> AttrMap;

    /// A tracer sharing this one's exporter with a private copy of its attributes.
    fn clone_tracer(&self) -> Box<dyn Tracer>;

    /// Start a span with no parent.
    fn start_root(&self, name: &str) -> Box<dyn Span> {
        self.start(&Context::new(), name, None)
    }

    /// Start a span under the span attached to the current context, such as
    /// the request span inside the HTTP middleware. A root span otherwise.
    fn start_child(&self, name: &str) -> Box<dyn Span> {
        self.start(&Context::current(), name, None)
    }
}

pub trait Span: Attributable + Send + Sync {
    /// Mark the span failed and record `err` on it.
    fn err(&self, err: &dyn Error);

    fn end(&self);

    /// Hex trace id, empty when not recorded.
    fn trace_id(&self) -> String;

    /// Context carrying this span, for starting children.
    fn context(&self) -> Context;
}
