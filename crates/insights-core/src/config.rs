use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::attrs::AttributeDefinition;
use crate::catalog::MetricDefinition;
use crate::defaults;
use crate::logs::{JsonLoggerConfig, Level, SentryConfig};
use crate::metrics::{OtelMeterConfig, PrometheusConfig, StatsdConfig};
use crate::traces::OtelTracerConfig;

/// Prefix of every environment override.
pub const ENV_PREFIX: &str = "INSIGHTS_";

/// Everything needed to build the telemetry backends, usually loaded from a
/// TOML file. Every field has a default, so an empty file is valid.
///
/// Secrets such as the Sentry DSN are better supplied through
/// `INSIGHTS_SENTRY_DSN` than written to the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightsConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_service_version")]
    pub service_version: String,
    #[serde(default = "defaults::http_attribute_definitions")]
    pub attributes: Vec<AttributeDefinition>,
    /// Merged into the default HTTP metrics without overriding them.
    #[serde(default)]
    pub metrics: Vec<MetricDefinition>,
    #[serde(default)]
    pub logs: JsonLoggerConfig,
    #[serde(default)]
    pub sentry: SentryConfig,
    #[serde(default)]
    pub prometheus: PrometheusConfig,
    #[serde(default)]
    pub statsd: StatsdConfig,
    /// OTLP push metrics.
    #[serde(default)]
    pub otlp_metrics: OtelMeterConfig,
    #[serde(default)]
    pub traces: OtelTracerConfig,
}

fn default_service_name() -> String {
    "insights".into()
}
fn default_service_version() -> String {
    env!("CARGO_PKG_VERSION").into()
}

impl Default for InsightsConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            service_version: default_service_version(),
            attributes: defaults::http_attribute_definitions(),
            metrics: Vec::new(),
            logs: JsonLoggerConfig::default(),
            sentry: SentryConfig::default(),
            prometheus: PrometheusConfig::default(),
            statsd: StatsdConfig::default(),
            otlp_metrics: OtelMeterConfig::default(),
            traces: OtelTracerConfig::default(),
        }
    }
}

impl InsightsConfig {
    /// Load from a TOML file, apply environment overrides, normalize and
    /// validate.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        let mut cfg = Self::from_toml_str(&text)?;
        cfg.apply_env();
        cfg.clean();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse without overrides or validation.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply `INSIGHTS_*` environment overrides.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok());
    }

    /// Apply overrides from `lookup`, keyed without the prefix.
    ///
    /// Values that fail to parse are logged and leave the field unchanged.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("SENTRY_DSN") {
            self.sentry.dsn = v;
        }
        if let Some(v) = lookup("SENTRY_ENV") {
            self.sentry.environment = v;
        }
        if let Some(v) = lookup("STATSD_HOST") {
            self.statsd.host = v;
        }
        if let Some(v) = lookup("GRAYLOG_HOST") {
            self.logs.graylog.host = v;
        }
        if let Some(v) = lookup("TRACES_HOST") {
            self.traces.host = v;
        }
        if let Some(v) = lookup("OTLP_METRICS_HOST") {
            self.otlp_metrics.host = v;
        }
        if let Some(v) = lookup("LOG_FILE") {
            self.logs.file = v;
        }
        parse_into(&lookup, "PROMETHEUS_PORT", &mut self.prometheus.port);
        parse_into(&lookup, "STATSD_PORT", &mut self.statsd.port);
        parse_into(&lookup, "OTLP_METRICS_PORT", &mut self.otlp_metrics.port);
        parse_into(&lookup, "TRACES_PORT", &mut self.traces.port);
        parse_into(&lookup, "TRACES_SAMPLE_RATE", &mut self.traces.sample_rate);
        parse_into::<Level>(&lookup, "LOG_LEVEL", &mut self.logs.level);
    }

    /// Fill in transport defaults and clamp rates into range.
    pub fn clean(&mut self) {
        self.traces.clean();
        self.otlp_metrics.clean();
        self.sentry.sample_rate = if self.sentry.sample_rate.is_nan() {
            0.0
        } else {
            self.sentry.sample_rate.clamp(0.0, 1.0)
        };
        if !self.prometheus.path.starts_with('/') {
            self.prometheus.path.insert(0, '/');
        }
    }

    /// Semantic validation for enabled backends.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::Validation("service_name is empty".into()));
        }
        if self.sentry.enabled && self.sentry.dsn.is_empty() {
            return Err(ConfigError::Validation(
                "sentry is enabled but no dsn is set".into(),
            ));
        }
        if self.prometheus.enabled && self.prometheus.port == 0 {
            return Err(ConfigError::Validation("prometheus.port is 0".into()));
        }
        if self.statsd.enabled {
            require_endpoint("statsd", &self.statsd.host, self.statsd.port)?;
        }
        let graylog = &self.logs.graylog;
        if graylog.enabled {
            require_endpoint("logs.graylog", &graylog.host, graylog.port)?;
        }
        if self.otlp_metrics.enabled {
            require_endpoint("otlp_metrics", &self.otlp_metrics.host, self.otlp_metrics.port)?;
        }
        if self.traces.enabled {
            require_endpoint("traces", &self.traces.host, self.traces.port)?;
        }
        Ok(())
    }
}

fn parse_into<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    field: &mut T,
) {
    let Some(raw) = lookup(key) else { return };
    match raw.trim().parse() {
        Ok(v) => *field = v,
        Err(_) => tracing::warn!(var = %format!("{ENV_PREFIX}{key}"), value = %raw, "ignoring unparsable override"),
    }
}

fn require_endpoint(section: &str, host: &str, port: u16) -> Result<(), ConfigError> {
    if host.is_empty() {
        return Err(ConfigError::Validation(format!(
            "{section} is enabled but no host is set"
        )));
    }
    if port == 0 {
        return Err(ConfigError::Validation(format!("{section}.port is 0")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
