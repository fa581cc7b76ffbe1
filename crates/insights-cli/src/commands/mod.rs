pub mod catalog;
pub mod check;
pub mod demo;

use std::path::Path;

use anyhow::Context;
use insights_core::{InsightsConfig, MetricDefinition};
use serde::Deserialize;

/// Load `path` or fall back to defaults. Either way environment overrides
/// are applied and the result is validated.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<InsightsConfig> {
    match path {
        Some(path) => InsightsConfig::load_from(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => {
            let mut cfg = InsightsConfig::default();
            cfg.apply_env();
            cfg.clean();
            cfg.validate().context("validating default config")?;
            Ok(cfg)
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct AppMetrics {
    #[serde(default)]
    metrics: Vec<MetricDefinition>,
}

/// Read the `[[metrics]]` tables of an application metrics file.
pub fn load_app_metrics(path: Option<&Path>) -> anyhow::Result<Vec<MetricDefinition>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let app: AppMetrics =
        toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok(app.metrics)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_metrics_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.toml");
        std::fs::write(
            &path,
            r#"
[[metrics]]
name = "jobs.done"
metric_type = "counter"

[[metrics]]
name = "jobs.latency"
metric_type = "histogram"
units = "s"
"#,
        )
        .unwrap();

        let defs = load_app_metrics(Some(&path)).unwrap();
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[1].name, "jobs.latency");
        assert!(load_app_metrics(None).unwrap().is_empty());

        std::fs::write(&path, "[[metrics]]\nname = 1\n").unwrap();
        let err = load_app_metrics(Some(&path)).unwrap_err();
        assert!(err.to_string().starts_with("parsing "));
        assert!(load_app_metrics(Some(&dir.path().join("missing.toml"))).is_err());
    }
}
