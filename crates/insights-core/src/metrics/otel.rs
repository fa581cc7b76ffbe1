//! Metrics pushed to an OTLP collector on a fixed reporting period.

use opentelemetry::metrics::{Counter, Histogram, MeterProvider as _, Unit, UpDownCounter};
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::MeterProvider;
use opentelemetry_sdk::{runtime, Resource};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::{check, resolve_labels, Meter, MeterBuilder, MetricOp};
use crate::attrs::{AttrBag, AttrMap, AttrValue};
use crate::catalog::{MetricCatalog, MetricDefinition, MetricKind};
use crate::error::{BackendError, MetricError};
use crate::flush::Flusher;
use crate::traces::otel::{OTLP_GRPC_PORT, OTLP_HTTP_PORT};

pub const MIN_REPORTING_PERIOD_MS: u64 = 1000;

fn default_host() -> String {
    "localhost".into()
}

fn default_reporting_period_ms() -> u64 {
    15_000
}

fn default_flush_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtelMeterConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    /// `0` picks the OTLP default for the transport.
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub use_http: bool,
    /// Push interval. Anything under a second falls back to the default.
    #[serde(default = "default_reporting_period_ms")]
    pub reporting_period_ms: u64,
    #[serde(default = "default_flush_timeout_ms")]
    pub flush_timeout_ms: u64,
}

impl Default for OtelMeterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_host(),
            port: 0,
            use_http: false,
            reporting_period_ms: default_reporting_period_ms(),
            flush_timeout_ms: default_flush_timeout_ms(),
        }
    }
}

impl OtelMeterConfig {
    pub fn clean(&mut self) {
        if self.port == 0 {
            self.port = if self.use_http {
                OTLP_HTTP_PORT
            } else {
                OTLP_GRPC_PORT
            };
        }
        if self.host.is_empty() {
            self.host = default_host();
        }
        if self.reporting_period_ms < MIN_REPORTING_PERIOD_MS {
            self.reporting_period_ms = default_reporting_period_ms();
        }
    }

    pub fn endpoint(&self) -> String {
        if self.use_http {
            format!("http://{}:{}/v1/metrics", self.host, self.port)
        } else {
            format!("http://{}:{}", self.host, self.port)
        }
    }
}

enum Instrument {
    Counter(Counter<f64>),
    UpDown(UpDownCounter<f64>),
    Histogram(Histogram<f64>),
}

struct OtelMeterShared {
    provider: MeterProvider,
    catalog: Arc<MetricCatalog>,
    /// Aligned with the catalog's definitions.
    instruments: Vec<Option<Instrument>>,
}

/// Meter over an SDK meter provider, one instrument per catalog definition.
///
/// Counters are `f64` sums, histograms and distributions are `f64`
/// histograms with the SDK's default buckets. Dimensions without a value
/// are left out of the data point.
pub struct OtelMeter {
    shared: Arc<OtelMeterShared>,
    labels: AttrBag,
}

impl OtelMeter {
    /// Meter over an already configured provider.
    pub fn from_provider(provider: MeterProvider, catalog: Arc<MetricCatalog>, scope: &str) -> Self {
        let meter = provider.meter(scope.to_owned());
        let instruments = catalog
            .definitions()
            .iter()
            .map(|def| instrument(&meter, def))
            .collect();
        Self {
            shared: Arc::new(OtelMeterShared {
                provider,
                catalog,
                instruments,
            }),
            labels: AttrBag::new(),
        }
    }

    /// Builder pushing to the configured collector, plus its flush step.
    ///
    /// Needs a running tokio runtime for the periodic reader.
    pub fn builder(
        conf: &OtelMeterConfig,
        catalog: Arc<MetricCatalog>,
        service_name: &str,
        service_version: &str,
    ) -> Result<(MeterBuilder, Flusher), BackendError> {
        let mut conf = conf.clone();
        conf.clean();
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(BackendError::init("otlp metrics", "no tokio runtime"));
        }

        let resource = Resource::new(vec![
            KeyValue::new("service.name", service_name.to_owned()),
            KeyValue::new("service.version", service_version.to_owned()),
        ]);
        let period = Duration::from_millis(conf.reporting_period_ms);
        let pipeline = opentelemetry_otlp::new_pipeline()
            .metrics(runtime::Tokio)
            .with_period(period)
            .with_resource(resource);
        let provider = if conf.use_http {
            pipeline
                .with_exporter(
                    opentelemetry_otlp::new_exporter()
                        .http()
                        .with_endpoint(conf.endpoint()),
                )
                .build()
        } else {
            pipeline
                .with_exporter(
                    opentelemetry_otlp::new_exporter()
                        .tonic()
                        .with_endpoint(conf.endpoint()),
                )
                .build()
        }
        .map_err(|e| BackendError::init("otlp metrics", e))?;

        let origin = OtelMeter::from_provider(provider, catalog, service_name);
        let flusher = origin.flusher(Duration::from_millis(conf.flush_timeout_ms));
        tracing::info!(endpoint = %conf.endpoint(), period_ms = conf.reporting_period_ms, "otlp metrics enabled");

        let shared = origin.shared;
        let builder: MeterBuilder = Arc::new(move || {
            Box::new(OtelMeter {
                shared: shared.clone(),
                labels: AttrBag::new(),
            }) as Box<dyn Meter>
        });
        Ok((builder, flusher))
    }

    /// Flush step `metrics.otlp` pushing everything collected so far.
    pub fn flusher(&self, timeout: Duration) -> Flusher {
        let shared = self.shared.clone();
        Flusher::new().then("metrics.otlp", timeout, move || {
            if let Err(e) = shared.provider.force_flush() {
                tracing::debug!(error = %e, "otlp metrics flush failed");
            }
        })
    }

    pub fn provider(&self) -> &MeterProvider {
        &self.shared.provider
    }
}

fn instrument(meter: &opentelemetry::metrics::Meter, def: &MetricDefinition) -> Option<Instrument> {
    let name = def.name.clone();
    let description = def.description.clone();
    let unit = Unit::new(def.units.clone());
    let built = match def.kind {
        MetricKind::MonotonicCounter => Instrument::Counter(
            meter
                .f64_counter(name)
                .with_description(description)
                .with_unit(unit)
                .init(),
        ),
        MetricKind::UpDownCounter => Instrument::UpDown(
            meter
                .f64_up_down_counter(name)
                .with_description(description)
                .with_unit(unit)
                .init(),
        ),
        MetricKind::Histogram | MetricKind::Distribution => Instrument::Histogram(
            meter
                .f64_histogram(name)
                .with_description(description)
                .with_unit(unit)
                .init(),
        ),
        _ => {
            tracing::warn!(metric = %def.name, kind = %def.kind, "kind not supported by otlp, skipped");
            return None;
        }
    };
    Some(built)
}

impl Meter for OtelMeter {
    fn record(&self, key: &str, op: MetricOp, labels: Option<&AttrMap>) -> Result<(), MetricError> {
        let shared = &self.shared;
        let (index, def) = check(&shared.catalog, key, op)?;
        let attributes: Vec<KeyValue> = self.labels.with(|instance| {
            resolve_labels(def, labels, instance)
                .into_iter()
                .filter_map(|(k, v)| v.map(|v| KeyValue::new(k.to_owned(), v)))
                .collect()
        });

        match (shared.instruments.get(index).and_then(Option::as_ref), op) {
            (Some(Instrument::Counter(c)), MetricOp::Add(v)) => c.add(v, &attributes),
            (Some(Instrument::UpDown(c)), MetricOp::Add(v)) => c.add(v, &attributes),
            (Some(Instrument::Histogram(h)), MetricOp::Rec(v)) => h.record(v, &attributes),
            _ => {
                return Err(MetricError::Unsupported {
                    name: key.to_owned(),
                    kind: def.kind.clone(),
                })
            }
        }
        Ok(())
    }

    fn str(&self, key: &str, val: &str) {
        self.labels.set(key, AttrValue::Str(val.to_owned()));
    }

    fn labels(&self) -> AttrMap {
        self.labels.snapshot()
    }

    fn clone_meter(&self) -> Box<dyn Meter> {
        Box::new(OtelMeter {
            shared: self.shared.clone(),
            labels: self.labels.deep_clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs::AttributeDefinition;
    use opentelemetry_sdk::metrics::data::{Histogram as HistogramData, ResourceMetrics, Sum};
    use opentelemetry_sdk::metrics::PeriodicReader;
    use opentelemetry_sdk::testing::metrics::InMemoryMetricsExporter;

    fn catalog() -> Arc<MetricCatalog> {
        let defs = vec![
            MetricDefinition::new("requests", MetricKind::MonotonicCounter)
                .with_attributes(vec![AttributeDefinition::str("route")]),
            MetricDefinition::new("inflight", MetricKind::UpDownCounter),
            MetricDefinition::new("latency", MetricKind::Histogram).with_units("s"),
            MetricDefinition::new("custom", MetricKind::Extension(120)),
        ];
        Arc::new(MetricCatalog::build(&defs).0)
    }

    fn meter(exporter: &InMemoryMetricsExporter) -> OtelMeter {
        let reader = PeriodicReader::builder(exporter.clone(), runtime::Tokio).build();
        let provider = MeterProvider::builder().with_reader(reader).build();
        OtelMeter::from_provider(provider, catalog(), "test")
    }

    fn find<'a>(metrics: &'a [ResourceMetrics], name: &str) -> &'a opentelemetry_sdk::metrics::data::Metric {
        metrics
            .iter()
            .flat_map(|rm| rm.scope_metrics.iter())
            .flat_map(|sm| sm.metrics.iter())
            .find(|m| m.name == name)
            .unwrap_or_else(|| panic!("metric {name} not exported"))
    }

    #[test]
    fn test_clean_defaults() {
        let mut conf = OtelMeterConfig {
            host: String::new(),
            reporting_period_ms: 10,
            ..Default::default()
        };
        conf.clean();
        assert_eq!(conf.port, OTLP_GRPC_PORT);
        assert_eq!(conf.reporting_period_ms, 15_000);
        assert_eq!(conf.endpoint(), "http://localhost:4317");

        let mut conf = OtelMeterConfig {
            use_http: true,
            ..Default::default()
        };
        conf.clean();
        assert_eq!(conf.endpoint(), "http://localhost:4318/v1/metrics");
    }

    #[test]
    fn test_builder_without_runtime_fails() {
        let conf = OtelMeterConfig {
            enabled: true,
            ..Default::default()
        };
        assert!(OtelMeter::builder(&conf, catalog(), "svc", "0").is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_flush_exports_catalog_instruments() {
        let exporter = InMemoryMetricsExporter::default();
        let meter = meter(&exporter);
        meter.str("route", "/users/{id}");
        meter.inc("requests");
        meter.add("requests", 2.0);
        meter.dec("inflight");
        meter.rec("latency", 0.25);
        meter.rec("latency", 0.75);

        let flusher = meter.flusher(Duration::from_secs(5));
        let report = tokio::task::spawn_blocking(move || flusher.flush())
            .await
            .unwrap();
        assert_eq!(report.completed, vec!["metrics.otlp"]);

        let metrics = exporter.get_finished_metrics().unwrap();
        let requests = find(&metrics, "requests");
        let sum = requests.data.as_any().downcast_ref::<Sum<f64>>().unwrap();
        assert!(sum.is_monotonic);
        assert_eq!(sum.data_points.len(), 1);
        assert_eq!(sum.data_points[0].value, 3.0);
        assert!(format!("{:?}", sum.data_points[0].attributes).contains("/users/{id}"));

        let inflight = find(&metrics, "inflight");
        let sum = inflight.data.as_any().downcast_ref::<Sum<f64>>().unwrap();
        assert!(!sum.is_monotonic);
        assert_eq!(sum.data_points[0].value, -1.0);

        let latency = find(&metrics, "latency");
        assert_eq!(latency.unit.as_str(), "s");
        let hist = latency
            .data
            .as_any()
            .downcast_ref::<HistogramData<f64>>()
            .unwrap();
        assert_eq!(hist.data_points[0].count, 2);
        assert_eq!(hist.data_points[0].sum, 1.0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_kind_checks_apply() {
        let exporter = InMemoryMetricsExporter::default();
        let meter = meter(&exporter);
        assert!(matches!(
            meter.record("requests", MetricOp::Rec(1.0), None),
            Err(MetricError::WrongKind { .. })
        ));
        assert!(matches!(
            meter.record("requests", MetricOp::Add(-1.0), None),
            Err(MetricError::NegativeDelta { .. })
        ));
        assert!(matches!(
            meter.record("missing", MetricOp::Add(1.0), None),
            Err(MetricError::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_clone_keeps_labels_private() {
        let exporter = InMemoryMetricsExporter::default();
        let meter = meter(&exporter);
        meter.str("route", "/a");
        let clone = meter.clone_meter();
        clone.str("route", "/b");
        assert_eq!(meter.labels()["route"], AttrValue::from("/a"));
        assert_eq!(clone.labels()["route"], AttrValue::from("/b"));
    }
}
