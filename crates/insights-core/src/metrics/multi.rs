use std::sync::Arc;

use super::{Meter, MeterBuilder, MetricOp};
use crate::attrs::AttrMap;
use crate::error::{BackendError, MetricError};

/// Forwards every call to each wrapped meter.
pub struct MultiMeter {
    meters: Vec<Box<dyn Meter>>,
}

impl MultiMeter {
    pub fn new(meters: Vec<Box<dyn Meter>>) -> Self {
        Self { meters }
    }

    /// Combine builders, skipping the ones that failed to construct.
    pub fn builder<I>(builders: I) -> MeterBuilder
    where
        I: IntoIterator<Item = Result<MeterBuilder, BackendError>>,
    {
        let builders: Vec<MeterBuilder> = builders
            .into_iter()
            .filter_map(|b| {
                b.map_err(|e| tracing::warn!(error = %e, "meter backend skipped"))
                    .ok()
            })
            .collect();
        Arc::new(move || {
            Box::new(MultiMeter::new(builders.iter().map(|b| b()).collect())) as Box<dyn Meter>
        })
    }

    pub fn len(&self) -> usize {
        self.meters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meters.is_empty()
    }
}

impl Meter for MultiMeter {
    /// Delivers to every meter; returns the first failure.
    fn record(&self, key: &str, op: MetricOp, labels: Option<&AttrMap>) -> Result<(), MetricError> {
        let mut first_err = None;
        for m in &self.meters {
            if let Err(e) = m.record(key, op, labels) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn str(&self, key: &str, val: &str) {
        for m in &self.meters {
            m.str(key, val);
        }
    }

    fn labels(&self) -> AttrMap {
        self.meters
            .iter()
            .map(|m| m.labels())
            .find(|l| !l.is_empty())
            .unwrap_or_default()
    }

    fn clone_meter(&self) -> Box<dyn Meter> {
        Box::new(MultiMeter::new(
            self.meters.iter().map(|m| m.clone_meter()).collect(),
        ))
    }
}
