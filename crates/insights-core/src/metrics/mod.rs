//! Counters and histograms recorded against the [`MetricCatalog`].
//!
//! Every [`Meter`] call resolves its metric through the catalog first, so a
//! histogram observation against a counter name fails with
//! [`MetricError::WrongKind`] instead of creating a stray series. The
//! convenience methods (`inc`, `rec`, ...) swallow those errors with a debug
//! event: recording a metric never interrupts the caller.

pub mod mock;
pub mod multi;
pub mod nop;
pub mod otel;
pub mod prometheus;
pub mod statsd;

use std::fmt;
use std::sync::Arc;

use crate::attrs::{self, AttrMap};
use crate::catalog::{MetricCatalog, MetricDefinition, MetricKind};
use crate::error::MetricError;

pub use mock::{MockMeter, MockRecorder, RecordedMetric};
pub use multi::MultiMeter;
pub use nop::NopMeter;
pub use otel::{OtelMeter, OtelMeterConfig};
pub use self::prometheus::{PrometheusConfig, PrometheusExporter, PrometheusMeter};
pub use statsd::{StatsdConfig, StatsdMeter};

/// Produces a fresh meter for each unit of work.
pub type MeterBuilder = Arc<dyn Fn() -> Box<dyn Meter> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricOp {
    /// Counter delta.
    Add(f64),
    /// Histogram or distribution observation.
    Rec(f64),
}

impl MetricOp {
    pub fn value(&self) -> f64 {
        match self {
            Self::Add(v) | Self::Rec(v) => *v,
        }
    }

    fn allowed_kinds(&self) -> &'static [MetricKind] {
        match self {
            Self::Add(_) => MetricKind::COUNTERS,
            Self::Rec(_) => MetricKind::OBSERVATIONS,
        }
    }
}

impl fmt::Display for MetricOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add(v) => write!(f, "add({v})"),
            Self::Rec(v) => write!(f, "rec({v})"),
        }
    }
}

pub trait Meter: Send + Sync {
    /// Apply `op` to metric `key`. `labels` override the instance labels.
    fn record(&self, key: &str, op: MetricOp, labels: Option<&AttrMap>) -> Result<(), MetricError>;

    /// Set an instance label used by every later call.
    fn str(&self, key: &str, val: &str);

    /// Snapshot of the instance labels.
    fn labels(&self) -> AttrMap;

    /// A meter sharing this one's backend with a private copy of its labels.
    fn clone_meter(&self) -> Box<dyn Meter>;

    fn inc(&self, key: &str) {
        swallow(key, self.record(key, MetricOp::Add(1.0), None));
    }

    fn dec(&self, key: &str) {
        swallow(key, self.record(key, MetricOp::Add(-1.0), None));
    }

    fn add(&self, key: &str, val: f64) {
        swallow(key, self.record(key, MetricOp::Add(val), None));
    }

    fn rec(&self, key: &str, val: f64) {
        swallow(key, self.record(key, MetricOp::Rec(val), None));
    }

    fn inc_wl(&self, key: &str, labels: &AttrMap) {
        swallow(key, self.record(key, MetricOp::Add(1.0), Some(labels)));
    }

    fn dec_wl(&self, key: &str, labels: &AttrMap) {
        swallow(key, self.record(key, MetricOp::Add(-1.0), Some(labels)));
    }

    fn add_wl(&self, key: &str, val: f64, labels: &AttrMap) {
        swallow(key, self.record(key, MetricOp::Add(val), Some(labels)));
    }

    fn rec_wl(&self, key: &str, val: f64, labels: &AttrMap) {
        swallow(key, self.record(key, MetricOp::Rec(val), Some(labels)));
    }
}

fn swallow(key: &str, result: Result<(), MetricError>) {
    if let Err(e) = result {
        tracing::debug!(metric = key, error = %e, "metric not recorded");
    }
}

/// Resolve `key` for `op` and validate the value against the metric's kind.
pub fn check<'a>(
    catalog: &'a MetricCatalog,
    key: &str,
    op: MetricOp,
) -> Result<(usize, &'a MetricDefinition), MetricError> {
    let (index, def) = catalog.lookup(key, op.allowed_kinds())?;
    let value = op.value();
    if !value.is_finite() {
        return Err(MetricError::NonFinite(key.to_owned()));
    }
    if def.kind == MetricKind::MonotonicCounter && value < 0.0 {
        return Err(MetricError::NegativeDelta {
            name: key.to_owned(),
            value,
        });
    }
    Ok((index, def))
}

/// Label values for each dimension of `def`: call labels first, then
/// instance labels, `None` when neither has it.
pub fn resolve_labels<'a>(
    def: &'a MetricDefinition,
    call: Option<&AttrMap>,
    instance: &AttrMap,
) -> Vec<(&'a str, Option<String>)> {
    def.label_names()
        .map(|name| (name, attrs::resolve(name, call, instance).map(|v| v.to_label())))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
