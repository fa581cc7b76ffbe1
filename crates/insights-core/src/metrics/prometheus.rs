//! Pull-based meter over a dedicated Prometheus registry.

use ::prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{check, resolve_labels, Meter, MeterBuilder, MetricOp};
use crate::attrs::{AttrBag, AttrMap, AttrValue};
use crate::catalog::{MetricCatalog, MetricDefinition, MetricKind, MAX_LABELS_WARN};
use crate::error::MetricError;

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    8090
}

fn default_path() -> String {
    "/metrics".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_path")]
    pub path: String,
    /// Prepended to every metric name, joined with `_`.
    #[serde(default)]
    pub prefix: String,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_port(),
            path: default_path(),
            prefix: String::new(),
        }
    }
}

enum Instrument {
    Counter(CounterVec),
    Gauge(GaugeVec),
    Histogram(HistogramVec),
}

/// Registry holding one instrument per catalog definition.
///
/// Shared by every [`PrometheusMeter`]; renders the text exposition format
/// and can serve it over HTTP.
pub struct PrometheusExporter {
    registry: Registry,
    catalog: Arc<MetricCatalog>,
    /// Aligned with the catalog's definitions.
    instruments: Vec<Option<Instrument>>,
}

impl PrometheusExporter {
    pub fn new(prefix: &str, catalog: Arc<MetricCatalog>) -> Self {
        let registry = Registry::new();
        let instruments = catalog
            .definitions()
            .iter()
            .map(|def| register(&registry, prefix, def))
            .collect();
        Self {
            registry,
            catalog,
            instruments,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Current values in the text exposition format.
    pub fn render(&self) -> String {
        let mut buf = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buf) {
            tracing::error!(error = %e, "failed to encode prometheus metrics");
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    pub fn router(self: Arc<Self>, path: &str) -> Router {
        Router::new()
            .route(path, get(metrics_handler))
            .with_state(self)
    }

    /// Serve the exposition at `host:port` + `path` until the task is dropped.
    pub async fn serve(self: Arc<Self>, host: String, port: u16, path: String) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind((host.as_str(), port)).await?;
        tracing::info!(%host, port, %path, "serving prometheus metrics");
        axum::serve(listener, self.router(&path)).await
    }

    fn apply(&self, index: usize, def: &MetricDefinition, op: MetricOp, values: &[&str]) -> Result<(), MetricError> {
        let backend = |e: ::prometheus::Error| MetricError::Backend {
            name: def.name.clone(),
            message: e.to_string(),
        };
        match (self.instruments.get(index).and_then(Option::as_ref), op) {
            (Some(Instrument::Counter(c)), MetricOp::Add(v)) => {
                c.get_metric_with_label_values(values).map_err(backend)?.inc_by(v)
            }
            (Some(Instrument::Gauge(g)), MetricOp::Add(v)) => {
                g.get_metric_with_label_values(values).map_err(backend)?.add(v)
            }
            (Some(Instrument::Histogram(h)), MetricOp::Rec(v)) => {
                h.get_metric_with_label_values(values).map_err(backend)?.observe(v)
            }
            _ => {
                return Err(MetricError::Unsupported {
                    name: def.name.clone(),
                    kind: def.kind.clone(),
                })
            }
        }
        Ok(())
    }
}

async fn metrics_handler(State(exporter): State<Arc<PrometheusExporter>>) -> impl IntoResponse {
    ([(CONTENT_TYPE, ::prometheus::TEXT_FORMAT)], exporter.render())
}

fn register(registry: &Registry, prefix: &str, def: &MetricDefinition) -> Option<Instrument> {
    let name = metric_name(prefix, &def.name);
    let help = if def.description.is_empty() {
        def.name.clone()
    } else {
        def.description.clone()
    };
    let labels: Vec<String> = def.label_names().map(label_name).collect();
    let labels: Vec<&str> = labels.iter().map(String::as_str).collect();
    if labels.len() > MAX_LABELS_WARN {
        tracing::warn!(metric = %def.name, labels = labels.len(), "high cardinality metric");
    }

    let built = match def.kind {
        MetricKind::MonotonicCounter => {
            CounterVec::new(Opts::new(name, help), &labels).map(Instrument::Counter)
        }
        MetricKind::UpDownCounter => {
            GaugeVec::new(Opts::new(name, help), &labels).map(Instrument::Gauge)
        }
        MetricKind::Histogram => {
            let buckets = def
                .buckets
                .clone()
                .unwrap_or_else(|| ::prometheus::DEFAULT_BUCKETS.to_vec());
            HistogramVec::new(HistogramOpts::new(name, help).buckets(buckets), &labels)
                .map(Instrument::Histogram)
        }
        _ => {
            tracing::warn!(metric = %def.name, kind = %def.kind, "kind not supported by prometheus, skipped");
            return None;
        }
    };

    let instrument = match built {
        Ok(i) => i,
        Err(e) => {
            tracing::warn!(metric = %def.name, error = %e, "cannot build prometheus metric");
            return None;
        }
    };
    let collector: Box<dyn ::prometheus::core::Collector> = match &instrument {
        Instrument::Counter(c) => Box::new(c.clone()),
        Instrument::Gauge(g) => Box::new(g.clone()),
        Instrument::Histogram(h) => Box::new(h.clone()),
    };
    if let Err(e) = registry.register(collector) {
        tracing::warn!(metric = %def.name, error = %e, "cannot register prometheus metric");
        return None;
    }
    Some(instrument)
}

/// `http.server.request.count` with prefix `app` becomes
/// `app_http_server_request_count`.
pub fn metric_name(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        sanitize(name)
    } else {
        sanitize(&format!("{prefix}_{name}"))
    }
}

/// Label names starting with `__` are reserved by Prometheus; they get an
/// `l` prefix.
fn label_name(name: &str) -> String {
    let mut out = sanitize(name);
    if out.starts_with("__") {
        out.insert(0, 'l');
    }
    out
}

fn sanitize(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// Meter writing into a shared [`PrometheusExporter`].
///
/// Dimensions without a value are exported as empty labels.
pub struct PrometheusMeter {
    exporter: Arc<PrometheusExporter>,
    labels: AttrBag,
}

impl PrometheusMeter {
    pub fn new(exporter: Arc<PrometheusExporter>) -> Self {
        Self {
            exporter,
            labels: AttrBag::new(),
        }
    }

    pub fn builder(exporter: Arc<PrometheusExporter>) -> MeterBuilder {
        Arc::new(move || Box::new(PrometheusMeter::new(exporter.clone())) as Box<dyn Meter>)
    }
}

impl Meter for PrometheusMeter {
    fn record(&self, key: &str, op: MetricOp, labels: Option<&AttrMap>) -> Result<(), MetricError> {
        let exporter = &self.exporter;
        let (index, def) = check(&exporter.catalog, key, op)?;
        let values: Vec<String> = self.labels.with(|instance| {
            resolve_labels(def, labels, instance)
                .into_iter()
                .map(|(_, v)| v.unwrap_or_default())
                .collect()
        });
        let values: Vec<&str> = values.iter().map(String::as_str).collect();
        exporter.apply(index, def, op, &values)
    }

    fn str(&self, key: &str, val: &str) {
        self.labels.set(key, AttrValue::Str(val.to_owned()));
    }

    fn labels(&self) -> AttrMap {
        self.labels.snapshot()
    }

    fn clone_meter(&self) -> Box<dyn Meter> {
        Box::new(PrometheusMeter {
            exporter: self.exporter.clone(),
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

    fn exporter() -> Arc<PrometheusExporter> {
        let defs = vec![
            MetricDefinition::new("jobs.done", MetricKind::MonotonicCounter)
                .with_attributes(vec![AttributeDefinition::str("queue")]),
            MetricDefinition::new("jobs.inflight", MetricKind::UpDownCounter),
            MetricDefinition::new("jobs.latency", MetricKind::Histogram)
                .with_buckets(vec![0.1, 1.0]),
            MetricDefinition::new("jobs.dist", MetricKind::Distribution),
        ];
        let (catalog, _) = MetricCatalog::build(&defs);
        Arc::new(PrometheusExporter::new("app", Arc::new(catalog)))
    }

    #[test]
    fn test_metric_name() {
        assert_eq!(metric_name("", "http.server.request.count"), "http_server_request_count");
        assert_eq!(metric_name("svc", "a-b.c"), "svc_a_b_c");
        assert_eq!(metric_name("", "9lives"), "_9lives");
    }

    #[test]
    fn test_reserved_label_prefix() {
        assert_eq!(label_name("__name"), "l__name");
        assert_eq!(label_name("..x"), "l__x");
        assert_eq!(label_name("_ok"), "_ok");

        let defs = vec![MetricDefinition::new("jobs.done", MetricKind::MonotonicCounter)
            .with_attributes(vec![AttributeDefinition::str("__queue")])];
        let (catalog, _) = MetricCatalog::build(&defs);
        let exporter = Arc::new(PrometheusExporter::new("app", Arc::new(catalog)));
        let meter = PrometheusMeter::new(exporter.clone());
        meter.str("__queue", "mail");
        meter.inc("jobs.done");
        let text = exporter.render();
        assert!(text.contains(r#"app_jobs_done{l__queue="mail"} 1"#), "{text}");
    }

    #[test]
    fn test_counter_gauge_histogram() {
        let exporter = exporter();
        let meter = PrometheusMeter::new(exporter.clone());
        meter.str("queue", "mail");
        meter.inc("jobs.done");
        meter.add("jobs.done", 2.0);
        meter.inc("jobs.inflight");
        meter.dec("jobs.inflight");
        meter.dec("jobs.inflight");
        meter.rec("jobs.latency", 0.5);

        let text = exporter.render();
        assert!(text.contains(r#"app_jobs_done{queue="mail"} 3"#), "{text}");
        assert!(text.contains("app_jobs_inflight -1"), "{text}");
        assert!(text.contains(r#"app_jobs_latency_bucket{le="1"} 1"#), "{text}");
    }

    #[test]
    fn test_missing_label_is_empty() {
        let exporter = exporter();
        PrometheusMeter::new(exporter.clone()).inc("jobs.done");
        assert!(exporter.render().contains(r#"app_jobs_done{queue=""} 1"#));
    }

    #[test]
    fn test_distribution_unsupported() {
        let meter = PrometheusMeter::new(exporter());
        assert!(matches!(
            meter.record("jobs.dist", MetricOp::Rec(1.0), None),
            Err(MetricError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_rec_on_counter_does_not_observe() {
        let exporter = exporter();
        let meter = PrometheusMeter::new(exporter.clone());
        let res = meter.record("jobs.done", MetricOp::Rec(1.0), None);
        assert!(matches!(res, Err(MetricError::WrongKind { .. })));
        assert!(!exporter.render().contains("app_jobs_done{"));
    }
}
