//! Error-tracking logger backed by a Sentry client.

use sentry::protocol::{Event, Exception, Values};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use super::{Level, LogMsg, Logger, LoggerBuilder, Record};
use crate::attrs::{self, AttrBag, AttrMap, AttrValue, Attributable};
use crate::error::BackendError;
use crate::flush::Flusher;

fn default_threshold() -> Level {
    Level::Warn
}

fn default_sample_rate() -> f32 {
    1.0
}

fn default_true() -> bool {
    true
}

fn default_flush_timeout_ms() -> u64 {
    2000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentryConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub dsn: String,
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub release: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f32,
    #[serde(default = "default_true")]
    pub attach_stacktrace: bool,
    /// Records below this level are not sent.
    #[serde(default = "default_threshold")]
    pub level_threshold: Level,
    /// Attribute names sent as indexed tags; the rest go to `extra`.
    #[serde(default)]
    pub allowed_tags: Vec<String>,
    #[serde(default = "default_flush_timeout_ms")]
    pub flush_timeout_ms: u64,
}

impl Default for SentryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dsn: String::new(),
            environment: String::new(),
            release: String::new(),
            sample_rate: default_sample_rate(),
            attach_stacktrace: true,
            level_threshold: default_threshold(),
            allowed_tags: Vec::new(),
            flush_timeout_ms: default_flush_timeout_ms(),
        }
    }
}

/// Where finished events go. Implemented by [`sentry::Client`].
pub trait EventSink: Send + Sync {
    fn capture(&self, event: Event<'static>);
    fn flush(&self, timeout: Duration) -> bool;
}

impl EventSink for sentry::Client {
    fn capture(&self, event: Event<'static>) {
        self.capture_event(event, None);
    }

    fn flush(&self, timeout: Duration) -> bool {
        sentry::Client::flush(self, Some(timeout))
    }
}

struct SentryShared {
    sink: Arc<dyn EventSink>,
    threshold: Level,
    allowed_tags: Vec<String>,
}

impl SentryShared {
    fn capture(&self, instance: &AttrMap, record: Record) {
        let fields = attrs::merge(instance, Some(&record.attrs));
        self.sink.capture(self.event(record, fields));
    }

    fn event(&self, record: Record, fields: AttrMap) -> Event<'static> {
        let mut event = Event {
            level: sentry_level(record.level),
            message: Some(record.message),
            timestamp: record.time.into(),
            ..Default::default()
        };
        if let Some(caller) = record.caller {
            event.culprit = Some(format!("{}:{}", caller.file(), caller.line()));
        }
        if let Some(err) = record.error {
            // innermost cause first, the logged error last
            let exceptions: Vec<Exception> = err
                .chain
                .iter()
                .rev()
                .chain(std::iter::once(&err.message))
                .map(|msg| Exception {
                    ty: "Error".into(),
                    value: Some(msg.clone()),
                    ..Default::default()
                })
                .collect();
            event.exception = Values::from(exceptions);
            event.extra.insert("error".into(), err.to_string().into());
        }
        for (k, v) in fields {
            if self.allowed_tags.iter().any(|t| *t == k) {
                event.tags.insert(k, v.to_label());
            } else {
                event.extra.insert(k, v.to_json());
            }
        }
        event
    }
}

/// Sends records at or above a level threshold to an error tracker.
///
/// Below the threshold every call returns before allocating. Fatal and Panic
/// records are always sent.
pub struct SentryLogger {
    shared: Arc<SentryShared>,
    attrs: AttrBag,
}

impl SentryLogger {
    /// Logger over any event sink, mainly for tests and custom transports.
    pub fn with_sink(sink: Arc<dyn EventSink>, threshold: Level, allowed_tags: Vec<String>) -> Self {
        Self {
            shared: Arc::new(SentryShared {
                sink,
                threshold,
                allowed_tags,
            }),
            attrs: AttrBag::new(),
        }
    }

    /// Builder over a dedicated Sentry client and its flush step.
    pub fn builder(conf: &SentryConfig) -> Result<(LoggerBuilder, Flusher), BackendError> {
        if conf.dsn.is_empty() {
            return Err(BackendError::Missing {
                backend: "sentry",
                field: "dsn",
            });
        }
        let dsn = conf
            .dsn
            .parse::<sentry::types::Dsn>()
            .map_err(|e| BackendError::init("sentry", e))?;

        let opts = sentry::ClientOptions {
            dsn: Some(dsn),
            environment: non_empty(&conf.environment),
            release: non_empty(&conf.release),
            sample_rate: conf.sample_rate.clamp(0.0, 1.0),
            attach_stacktrace: conf.attach_stacktrace,
            default_integrations: false,
            ..Default::default()
        };
        let client = Arc::new(sentry::Client::from(sentry::apply_defaults(opts)));
        if !client.is_enabled() {
            return Err(BackendError::init("sentry", "client is disabled"));
        }

        let logger = SentryLogger::with_sink(
            client.clone(),
            conf.level_threshold,
            conf.allowed_tags.clone(),
        );
        let shared = logger.shared;

        let timeout = Duration::from_millis(conf.flush_timeout_ms);
        let mut flusher = Flusher::new();
        flusher.push("logs.sentry", timeout, move || {
            if !EventSink::flush(client.as_ref(), timeout) {
                tracing::debug!("sentry queue not drained before timeout");
            }
        });

        let builder: LoggerBuilder = Arc::new(move || {
            Box::new(SentryLogger {
                shared: shared.clone(),
                attrs: AttrBag::new(),
            }) as Box<dyn Logger>
        });
        Ok((builder, flusher))
    }
}

fn non_empty(s: &str) -> Option<Cow<'static, str>> {
    (!s.is_empty()).then(|| Cow::Owned(s.to_owned()))
}

fn sentry_level(level: Level) -> sentry::Level {
    match level {
        Level::Trace | Level::Debug => sentry::Level::Debug,
        Level::Info => sentry::Level::Info,
        Level::Warn => sentry::Level::Warning,
        Level::Error => sentry::Level::Error,
        Level::Fatal | Level::Panic => sentry::Level::Fatal,
    }
}

impl Attributable for SentryLogger {
    fn set_attr(&self, key: &str, val: AttrValue) {
        self.attrs.set(key, val);
    }
}

impl Logger for SentryLogger {
    fn emit(&self, record: Record) {
        if !self.enabled(record.level) {
            return;
        }
        self.attrs.with(|instance| self.shared.capture(instance, record));
    }

    fn message(&self, record: Record) -> LogMsg {
        if !self.enabled(record.level) {
            return LogMsg::disabled();
        }
        let shared = self.shared.clone();
        let instance = self.attrs.snapshot();
        LogMsg::new(record, move |r| shared.capture(&instance, r))
    }

    fn enabled(&self, level: Level) -> bool {
        level >= self.shared.threshold || level >= Level::Fatal
    }

    fn attrs(&self) -> AttrMap {
        self.attrs.snapshot()
    }

    fn clone_logger(&self) -> Box<dyn Logger> {
        Box::new(SentryLogger {
            shared: self.shared.clone(),
            attrs: self.attrs.deep_clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
