use std::error::Error;
use std::sync::Arc;

use super::{Context, Span, Tracer, TracerBuilder};
use crate::attrs::{AttrMap, AttrValue, Attributable};

#[derive(Debug, Default, Clone, Copy)]
pub struct NopTracer;

impl NopTracer {
    pub fn builder() -> TracerBuilder {
        Arc::new(|| Box::new(NopTracer) as Box<dyn Tracer>)
    }
}

impl Attributable for NopTracer {
    fn set_attr(&self, _key: &str, _val: AttrValue) {}
}

impl Tracer for NopTracer {
    fn start(&self, _parent: &Context, _name: &str, _attrs: Option<&AttrMap>) -> Box<dyn Span> {
        Box::new(NopSpan)
    }

    fn attrs(&self) -> AttrMap {
        AttrMap::new()
    }

    fn clone_tracer(&self) -> Box<dyn Tracer> {
        Box::new(NopTracer)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NopSpan;

impl Attributable for NopSpan {
    fn set_attr(&self, _key: &str, _val: AttrValue) {}
}

impl Span for NopSpan {
    fn err(&self, _err: &dyn Error) {}

    fn end(&self) {}

    fn trace_id(&self) -> String {
        String::new()
    }

    fn context(&self) -> Context {
        Context::new()
    }
}
