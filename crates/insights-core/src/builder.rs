//! Assembles every backend from an [`InsightsConfig`].

use std::sync::Arc;

use crate::catalog::{self, MetricCatalog, MetricDefinition};
use crate::config::InsightsConfig;
use crate::defaults;
use crate::error::{BackendError, MetricError};
use crate::flush::{FlushReport, Flusher};
use crate::insighter::{Insighter, InsighterBuilder};
use crate::logs::{JsonLogger, Logger, LoggerBuilder, MultiLogger, SentryLogger};
use crate::metrics::{
    MeterBuilder, MultiMeter, NopMeter, OtelMeter, PrometheusExporter, PrometheusMeter, StatsdMeter,
};
use crate::traces::{NopTracer, OtelTracer, TracerBuilder};

/// Everything [`create_insights`] built.
pub struct Insights {
    pub builder: InsighterBuilder,
    /// Runs every backend's flush step. Call once before exiting.
    pub flusher: Flusher,
    pub catalog: Arc<MetricCatalog>,
    /// Present when Prometheus is enabled.
    pub prometheus: Option<Arc<PrometheusExporter>>,
    server: Option<tokio::task::JoinHandle<()>>,
}

impl Insights {
    pub fn insighter(&self) -> Insighter {
        self.builder.build()
    }

    /// Stop the metrics endpoint, if one was started, and flush.
    pub fn shutdown(self) -> FlushReport {
        if let Some(server) = self.server {
            server.abort();
        }
        self.flusher.flush()
    }
}

/// Default HTTP metrics, then the configured ones, then `app_metrics`.
/// Earlier definitions win on name clashes.
///
/// The configured and application lists are cleaned first; the definitions
/// they drop are returned, indexed within their own list.
pub fn metric_definitions(
    config: &InsightsConfig,
    app_metrics: &[MetricDefinition],
) -> (Vec<MetricDefinition>, Vec<MetricError>) {
    let (configured, mut errors) = catalog::clean_up(&config.metrics);
    let (app, app_errors) = catalog::clean_up(app_metrics);
    errors.extend(app_errors);
    let merged = catalog::merge(&defaults::http_metric_definitions(), &configured, false);
    (catalog::merge(&merged, &app, false), errors)
}

/// Build the backends described by `config`.
///
/// Only the JSON logger is required: if it cannot be created this fails.
/// Any other backend that cannot be created is reported through the
/// startup logger and replaced by a no-op. `app_metrics` are merged after
/// the configured ones without overriding them.
///
/// The Prometheus endpoint is served in the background when called from
/// within a tokio runtime. OTLP tracing also needs a runtime.
pub fn create_insights(
    config: &InsightsConfig,
    app_metrics: &[MetricDefinition],
) -> Result<Insights, BackendError> {
    let mut flusher = Flusher::new();
    let mut backend_errors: Vec<BackendError> = Vec::new();

    // -- logs ---------------------------------------------------------------
    let (json, json_flush) = JsonLogger::builder(&config.logs)?;
    flusher.extend(json_flush);
    let mut loggers: Vec<LoggerBuilder> = vec![json];
    if config.sentry.enabled {
        match SentryLogger::builder(&config.sentry) {
            Ok((b, f)) => {
                loggers.push(b);
                flusher.extend(f);
            }
            Err(e) => backend_errors.push(e),
        }
    }
    let logger: LoggerBuilder = if loggers.len() == 1 {
        loggers.remove(0)
    } else {
        MultiLogger::builder(loggers.into_iter().map(Ok))
    };
    let startup = logger();

    // -- catalog ------------------------------------------------------------
    let (definitions, mut metric_errors) = metric_definitions(config, app_metrics);
    let (metric_catalog, build_errors) = MetricCatalog::build(&definitions);
    metric_errors.extend(build_errors);
    for e in &metric_errors {
        startup.warn_msg("metric definition dropped").str("error", &e.to_string()).send();
    }
    let metric_catalog = Arc::new(metric_catalog);

    // -- metrics ------------------------------------------------------------
    let mut meters: Vec<MeterBuilder> = Vec::new();
    let mut prometheus = None;
    let mut server = None;
    if config.prometheus.enabled {
        let exporter = Arc::new(PrometheusExporter::new(
            &config.prometheus.prefix,
            metric_catalog.clone(),
        ));
        meters.push(PrometheusMeter::builder(exporter.clone()));
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let exp = exporter.clone();
            let conf = config.prometheus.clone();
            server = Some(handle.spawn(async move {
                if let Err(e) = exp.serve(conf.host, conf.port, conf.path).await {
                    tracing::error!(error = %e, "prometheus endpoint stopped");
                }
            }));
        }
        prometheus = Some(exporter);
    }
    if config.statsd.enabled {
        match StatsdMeter::builder(&config.statsd, metric_catalog.clone()) {
            Ok((b, f)) => {
                meters.push(b);
                flusher.extend(f);
            }
            Err(e) => backend_errors.push(e),
        }
    }
    if config.otlp_metrics.enabled {
        match OtelMeter::builder(
            &config.otlp_metrics,
            metric_catalog.clone(),
            &config.service_name,
            &config.service_version,
        ) {
            Ok((b, f)) => {
                meters.push(b);
                flusher.extend(f);
            }
            Err(e) => backend_errors.push(e),
        }
    }
    let meter: MeterBuilder = match meters.len() {
        0 => NopMeter::builder(),
        1 => meters.remove(0),
        _ => MultiMeter::builder(meters.into_iter().map(Ok)),
    };

    // -- traces -------------------------------------------------------------
    let tracer: TracerBuilder = if config.traces.enabled && config.traces.sample_rate > 0.0 {
        match OtelTracer::builder(&config.traces, &config.service_name, &config.service_version) {
            Ok((b, f)) => {
                flusher.extend(f);
                b
            }
            Err(e) => {
                backend_errors.push(e);
                NopTracer::builder()
            }
        }
    } else {
        NopTracer::builder()
    };

    // -- attributes ---------------------------------------------------------
    let (builder, attr_errors) = InsighterBuilder::new(&config.attributes, logger, meter, tracer);
    for e in &attr_errors {
        startup.warn_msg("attribute definition dropped").str("error", &e.to_string()).send();
    }
    for e in &backend_errors {
        startup.err(e, "telemetry backend disabled");
    }

    tracing::info!(
        service = %config.service_name,
        metrics = metric_catalog.len(),
        attributes = builder.attributes.len(),
        flush_steps = flusher.len(),
        "insights ready"
    );

    Ok(Insights {
        builder,
        flusher,
        catalog: metric_catalog,
        prometheus,
        server,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
