//! OTLP-exported spans built on the OpenTelemetry SDK.

use opentelemetry::trace::{Status, TraceContextExt, Tracer as _, TracerProvider as _};
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{self as sdktrace, Sampler, TracerProvider};
use opentelemetry_sdk::{runtime, Resource};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use super::{Context, Span, Tracer, TracerBuilder};
use crate::attrs::{self, AttrBag, AttrMap, AttrValue, Attributable};
use crate::error::BackendError;
use crate::flush::Flusher;

pub const OTLP_GRPC_PORT: u16 = 4317;
pub const OTLP_HTTP_PORT: u16 = 4318;

fn default_host() -> String {
    "localhost".into()
}

fn default_sample_rate() -> f64 {
    1.0
}

fn default_flush_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtelTracerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    /// `0` picks the OTLP default for the transport.
    #[serde(default)]
    pub port: u16,
    /// OTLP over HTTP/protobuf instead of gRPC.
    #[serde(default)]
    pub use_http: bool,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,
    #[serde(default = "default_flush_timeout_ms")]
    pub flush_timeout_ms: u64,
}

impl Default for OtelTracerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_host(),
            port: 0,
            use_http: false,
            sample_rate: default_sample_rate(),
            flush_timeout_ms: default_flush_timeout_ms(),
        }
    }
}

impl OtelTracerConfig {
    /// Fill in the transport's default port and host and clamp the rate.
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
        self.sample_rate = if self.sample_rate.is_nan() {
            0.0
        } else {
            self.sample_rate.clamp(0.0, 1.0)
        };
    }

    pub fn endpoint(&self) -> String {
        if self.use_http {
            format!("http://{}:{}/v1/traces", self.host, self.port)
        } else {
            format!("http://{}:{}", self.host, self.port)
        }
    }
}

struct OtelShared {
    provider: TracerProvider,
    tracer: sdktrace::Tracer,
}

/// Tracer over a dedicated SDK provider.
pub struct OtelTracer {
    shared: Arc<OtelShared>,
    attrs: AttrBag,
}

impl OtelTracer {
    /// Tracer over an already configured provider.
    pub fn from_provider(provider: TracerProvider, name: &str) -> Self {
        let tracer = provider.tracer(name.to_owned());
        Self {
            shared: Arc::new(OtelShared { provider, tracer }),
            attrs: AttrBag::new(),
        }
    }

    /// Builder exporting to the configured collector, plus its flush step.
    ///
    /// Needs a running tokio runtime for the exporter and batch processor.
    pub fn builder(
        conf: &OtelTracerConfig,
        service_name: &str,
        service_version: &str,
    ) -> Result<(TracerBuilder, Flusher), BackendError> {
        let mut conf = conf.clone();
        conf.clean();
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(BackendError::init("otlp", "no tokio runtime"));
        }

        let exporter = if conf.use_http {
            opentelemetry_otlp::new_exporter()
                .http()
                .with_endpoint(conf.endpoint())
                .build_span_exporter()
        } else {
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(conf.endpoint())
                .build_span_exporter()
        }
        .map_err(|e| BackendError::init("otlp", e))?;

        let ratio = Sampler::TraceIdRatioBased(conf.sample_rate);
        let sampler = if conf.sample_rate >= 1.0 {
            Sampler::ParentBased(Box::new(Sampler::AlwaysOn))
        } else {
            Sampler::ParentBased(Box::new(ratio))
        };
        let resource = Resource::new(vec![
            KeyValue::new("service.name", service_name.to_owned()),
            KeyValue::new("service.version", service_version.to_owned()),
        ]);
        let provider = TracerProvider::builder()
            .with_batch_exporter(exporter, runtime::Tokio)
            .with_config(
                sdktrace::Config::default()
                    .with_sampler(sampler)
                    .with_resource(resource),
            )
            .build();

        let origin = OtelTracer::from_provider(provider, service_name);
        let shared = origin.shared;

        let mut flusher = Flusher::new();
        let flush_shared = shared.clone();
        flusher.push(
            "traces.otlp",
            Duration::from_millis(conf.flush_timeout_ms),
            move || {
                for res in flush_shared.provider.force_flush() {
                    if let Err(e) = res {
                        tracing::debug!(error = %e, "trace flush failed");
                    }
                }
            },
        );

        tracing::info!(endpoint = %conf.endpoint(), rate = conf.sample_rate, "otlp tracing enabled");
        let builder: TracerBuilder = Arc::new(move || {
            Box::new(OtelTracer {
                shared: shared.clone(),
                attrs: AttrBag::new(),
            }) as Box<dyn Tracer>
        });
        Ok((builder, flusher))
    }

    /// Attributes a span started with `call` would get.
    pub fn span_attributes(&self, call: Option<&AttrMap>) -> Vec<KeyValue> {
        self.attrs
            .with(|instance| attrs::merge(instance, call))
            .iter()
            .map(|(k, v)| key_value(k, v))
            .collect()
    }

    pub fn provider(&self) -> &TracerProvider {
        &self.shared.provider
    }
}

fn key_value(key: &str, val: &AttrValue) -> KeyValue {
    let key = key.to_owned();
    match val {
        AttrValue::Str(s) => KeyValue::new(key, s.clone()),
        AttrValue::I64(v) => KeyValue::new(key, *v),
        AttrValue::F64(v) => KeyValue::new(key, *v),
        AttrValue::Bool(v) => KeyValue::new(key, *v),
    }
}

impl Attributable for OtelTracer {
    fn set_attr(&self, key: &str, val: AttrValue) {
        self.attrs.set(key, val);
    }
}

impl Tracer for OtelTracer {
    fn start(&self, parent: &Context, name: &str, attrs: Option<&AttrMap>) -> Box<dyn Span> {
        let tracer = &self.shared.tracer;
        let span = tracer
            .span_builder(name.to_owned())
            .with_attributes(self.span_attributes(attrs))
            .start_with_context(tracer, parent);
        Box::new(OtelSpan {
            cx: parent.with_span(span),
        })
    }

    fn attrs(&self) -> AttrMap {
        self.attrs.snapshot()
    }

    fn clone_tracer(&self) -> Box<dyn Tracer> {
        Box::new(OtelTracer {
            shared: self.shared.clone(),
            attrs: self.attrs.deep_clone(),
        })
    }
}

/// A started span, carried in its own context.
pub struct OtelSpan {
    cx: Context,
}

impl Attributable for OtelSpan {
    fn set_attr(&self, key: &str, val: AttrValue) {
        self.cx.span().set_attribute(key_value(key, &val));
    }
}

impl Span for OtelSpan {
    fn err(&self, err: &dyn Error) {
        let span = self.cx.span();
        span.record_error(err);
        span.set_status(Status::error(err.to_string()));
    }

    fn end(&self) {
        self.cx.span().end();
    }

    fn trace_id(&self) -> String {
        let sc = self.cx.span().span_context().clone();
        if sc.is_valid() {
            sc.trace_id().to_string()
        } else {
            String::new()
        }
    }

    fn context(&self) -> Context {
        self.cx.clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry_sdk::export::trace::{ExportResult, SpanData, SpanExporter};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;

    #[derive(Debug, Clone, Default)]
    struct Captured(Arc<Mutex<Vec<SpanData>>>);

    impl SpanExporter for Captured {
        fn export(
            &mut self,
            batch: Vec<SpanData>,
        ) -> Pin<Box<dyn Future<Output = ExportResult> + Send + 'static>> {
            self.0.lock().unwrap().extend(batch);
            Box::pin(std::future::ready(Ok(())))
        }
    }

    #[test]
    fn test_clean_defaults() {
        let mut conf = OtelTracerConfig {
            host: String::new(),
            sample_rate: 3.0,
            ..Default::default()
        };
        conf.clean();
        assert_eq!(conf.port, OTLP_GRPC_PORT);
        assert_eq!(conf.host, "localhost");
        assert_eq!(conf.sample_rate, 1.0);
        assert_eq!(conf.endpoint(), "http://localhost:4317");

        let mut conf = OtelTracerConfig {
            use_http: true,
            sample_rate: -1.0,
            ..Default::default()
        };
        conf.clean();
        assert_eq!(conf.port, OTLP_HTTP_PORT);
        assert_eq!(conf.sample_rate, 0.0);
        assert_eq!(conf.endpoint(), "http://localhost:4318/v1/traces");
    }

    #[test]
    fn test_builder_without_runtime_fails() {
        let conf = OtelTracerConfig {
            enabled: true,
            ..Default::default()
        };
        assert!(OtelTracer::builder(&conf, "svc", "0").is_err());
    }

    #[test]
    fn test_child_shares_trace_id() {
        let tracer = OtelTracer::from_provider(TracerProvider::builder().build(), "test");
        let root = tracer.start_root("root");
        let id = root.trace_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));

        let child = tracer.start(&root.context(), "child", None);
        assert_eq!(child.trace_id(), id);
        child.end();
        root.end();
    }

    #[test]
    fn test_span_attributes_precedence() {
        let tracer = OtelTracer::from_provider(TracerProvider::builder().build(), "test");
        tracer.str("route", "/a");
        tracer.i64("n", 1);
        let kvs = tracer.span_attributes(Some(&crate::attr_map! { "route" => "/b" }));
        let route = kvs.iter().find(|kv| kv.key.as_str() == "route").unwrap();
        assert_eq!(route.value.as_str(), "/b");
        assert!(kvs.iter().any(|kv| kv.key.as_str() == "n"));
    }

    #[test]
    fn test_err_sets_status() {
        let captured = Captured::default();
        let provider = TracerProvider::builder()
            .with_simple_exporter(captured.clone())
            .build();
        let tracer = OtelTracer::from_provider(provider, "test");

        let span = tracer.start_root("failing");
        let err = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        span.err(&err);
        span.end();
        tracer.provider().force_flush();

        let spans = captured.0.lock().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "failing");
        assert_eq!(spans[0].status, Status::error("disk gone"));
    }

    #[test]
    fn test_clone_isolates_attrs() {
        let tracer = OtelTracer::from_provider(TracerProvider::builder().build(), "test");
        tracer.str("a", "1");
        let clone = tracer.clone_tracer();
        clone.str("a", "2");
        assert_eq!(tracer.attrs()["a"], AttrValue::from("1"));
        assert_eq!(clone.attrs()["a"], AttrValue::from("2"));
    }
}
