//! One logger, one meter and one tracer working on the same unit of work.

use std::fmt;
use std::sync::Arc;

use crate::attrs::{AttrValue, Attributable, AttributeDefinition, AttributeSet};
use crate::error::AttrError;
use crate::logs::{Logger, LoggerBuilder, NopLogger};
use crate::metrics::{Meter, MeterBuilder, NopMeter};
use crate::traces::{NopTracer, Tracer, TracerBuilder};

/// Facade over the three signals.
///
/// Attributes set on the Insighter must be declared in its
/// [`AttributeSet`]. Each value is written to the signals its definition
/// routes it to; the meter gets the label (string) form. Unknown names and
/// values of the wrong kind are reported at debug level and dropped.
pub struct Insighter {
    logger: Box<dyn Logger>,
    meter: Box<dyn Meter>,
    tracer: Box<dyn Tracer>,
    attributes: Arc<AttributeSet>,
}

impl Insighter {
    pub fn new(
        logger: Box<dyn Logger>,
        meter: Box<dyn Meter>,
        tracer: Box<dyn Tracer>,
        attributes: Arc<AttributeSet>,
    ) -> Self {
        Self {
            logger,
            meter,
            tracer,
            attributes,
        }
    }

    /// Every operation succeeds and does nothing.
    pub fn nop() -> Self {
        Self::new(
            Box::new(NopLogger),
            Box::new(NopMeter),
            Box::new(NopTracer),
            Arc::new(AttributeSet::default()),
        )
    }

    pub fn l(&self) -> &dyn Logger {
        self.logger.as_ref()
    }

    pub fn m(&self) -> &dyn Meter {
        self.meter.as_ref()
    }

    pub fn t(&self) -> &dyn Tracer {
        self.tracer.as_ref()
    }

    pub fn attributes(&self) -> &AttributeSet {
        &self.attributes
    }

    /// A clone with some parts replaced. `None` keeps a clone of the current part.
    pub fn clone_with(
        &self,
        logger: Option<Box<dyn Logger>>,
        meter: Option<Box<dyn Meter>>,
        tracer: Option<Box<dyn Tracer>>,
    ) -> Self {
        Self {
            logger: logger.unwrap_or_else(|| self.logger.clone_logger()),
            meter: meter.unwrap_or_else(|| self.meter.clone_meter()),
            tracer: tracer.unwrap_or_else(|| self.tracer.clone_tracer()),
            attributes: self.attributes.clone(),
        }
    }

    fn reject(&self, key: &str, err: &AttrError) {
        self.logger
            .debug_msg("attribute ignored")
            .str("attribute", key)
            .str("reason", &err.to_string())
            .send();
    }
}

impl Attributable for Insighter {
    fn set_attr(&self, key: &str, val: AttrValue) {
        let def = match self.attributes.check(key, &val) {
            Ok(def) => def,
            Err(e) => return self.reject(key, &e),
        };
        if def.to_metrics {
            self.meter.str(key, &val.to_label());
        }
        if def.to_traces {
            self.tracer.set_attr(key, val.clone());
        }
        if def.to_logs {
            self.logger.set_attr(key, val);
        }
    }
}

impl Clone for Insighter {
    fn clone(&self) -> Self {
        self.clone_with(None, None, None)
    }
}

impl Default for Insighter {
    fn default() -> Self {
        Self::nop()
    }
}

impl fmt::Debug for Insighter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Insighter")
            .field("logger_attrs", &self.logger.attrs())
            .field("meter_labels", &self.meter.labels())
            .field("tracer_attrs", &self.tracer.attrs())
            .finish()
    }
}

/// Produces a fresh [`Insighter`] per unit of work from shared backends.
#[derive(Clone)]
pub struct InsighterBuilder {
    pub logger: LoggerBuilder,
    pub meter: MeterBuilder,
    pub tracer: TracerBuilder,
    pub attributes: Arc<AttributeSet>,
}

impl InsighterBuilder {
    /// Builder over the given backends. Invalid attribute definitions are
    /// dropped and returned.
    pub fn new(
        attr_defs: &[AttributeDefinition],
        logger: LoggerBuilder,
        meter: MeterBuilder,
        tracer: TracerBuilder,
    ) -> (Self, Vec<AttrError>) {
        let (attributes, errors) = AttributeSet::new(attr_defs);
        let builder = Self {
            logger,
            meter,
            tracer,
            attributes: Arc::new(attributes),
        };
        (builder, errors)
    }

    pub fn nop() -> Self {
        Self {
            logger: NopLogger::builder(),
            meter: NopMeter::builder(),
            tracer: NopTracer::builder(),
            attributes: Arc::new(AttributeSet::default()),
        }
    }

    pub fn build(&self) -> Insighter {
        Insighter::new(
            (self.logger)(),
            (self.meter)(),
            (self.tracer)(),
            self.attributes.clone(),
        )
    }
}

impl fmt::Debug for InsighterBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InsighterBuilder")
            .field("attributes", &self.attributes.len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
