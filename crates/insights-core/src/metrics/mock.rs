use std::sync::{Arc, Mutex, PoisonError};

use super::{check, resolve_labels, Meter, MeterBuilder, MetricOp};
use crate::attrs::{self, AttrBag, AttrMap, AttrValue};
use crate::catalog::MetricCatalog;
use crate::error::MetricError;

/// One accepted metric call with its resolved labels.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedMetric {
    pub key: String,
    pub op: MetricOp,
    pub labels: AttrMap,
}

/// Shared log of every call accepted by the mock meters built from it.
#[derive(Debug, Clone, Default)]
pub struct MockRecorder {
    calls: Arc<Mutex<Vec<RecordedMetric>>>,
}

impl MockRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<RecordedMetric> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Calls recorded for `key`.
    pub fn for_key(&self, key: &str) -> Vec<RecordedMetric> {
        self.records().into_iter().filter(|r| r.key == key).collect()
    }

    pub fn clear(&self) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn push(&self, record: RecordedMetric) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }
}

/// Records calls instead of exporting them.
///
/// With a catalog it validates like a real backend and keeps only the
/// metric's dimensions; without one it accepts any key and keeps every label.
pub struct MockMeter {
    recorder: MockRecorder,
    catalog: Option<Arc<MetricCatalog>>,
    labels: AttrBag,
}

impl MockMeter {
    pub fn new(recorder: MockRecorder, catalog: Option<Arc<MetricCatalog>>) -> Self {
        Self {
            recorder,
            catalog,
            labels: AttrBag::new(),
        }
    }

    pub fn builder(recorder: MockRecorder, catalog: Option<Arc<MetricCatalog>>) -> MeterBuilder {
        Arc::new(move || {
            Box::new(MockMeter::new(recorder.clone(), catalog.clone())) as Box<dyn Meter>
        })
    }
}

impl Meter for MockMeter {
    fn record(&self, key: &str, op: MetricOp, labels: Option<&AttrMap>) -> Result<(), MetricError> {
        let resolved = self.labels.with(|instance| -> Result<AttrMap, MetricError> {
            match &self.catalog {
                Some(catalog) => {
                    let (_, def) = check(catalog, key, op)?;
                    Ok(resolve_labels(def, labels, instance)
                        .into_iter()
                        .filter_map(|(k, v)| v.map(|v| (k.to_owned(), AttrValue::Str(v))))
                        .collect())
                }
                None => Ok(attrs::merge(instance, labels)),
            }
        })?;
        self.recorder.push(RecordedMetric {
            key: key.to_owned(),
            op,
            labels: resolved,
        });
        Ok(())
    }

    fn str(&self, key: &str, val: &str) {
        self.labels.set(key, AttrValue::Str(val.to_owned()));
    }

    fn labels(&self) -> AttrMap {
        self.labels.snapshot()
    }

    fn clone_meter(&self) -> Box<dyn Meter> {
        Box::new(MockMeter {
            recorder: self.recorder.clone(),
            catalog: self.catalog.clone(),
            labels: self.labels.deep_clone(),
        })
    }
}
