use std::path::Path;

use anyhow::Context;
use insights_core::{metric_definitions, InsightsConfig, MetricCatalog, MetricDefinition};

/// Merged, validated catalog as pretty JSON. Dropped definitions are
/// reported as warnings.
pub fn render(cfg: &InsightsConfig, app: &[MetricDefinition]) -> anyhow::Result<String> {
    let (definitions, mut errors) = metric_definitions(cfg, app);
    let (catalog, build_errors) = MetricCatalog::build(&definitions);
    errors.extend(build_errors);
    for e in &errors {
        tracing::warn!(error = %e, "metric definition dropped");
    }
    serde_json::to_string_pretty(catalog.definitions()).context("serializing catalog")
}

pub fn run(config: Option<&Path>, app: Option<&Path>) -> anyhow::Result<()> {
    let cfg = super::load_config(config)?;
    let app = super::load_app_metrics(app)?;
    println!("{}", render(&cfg, &app)?);
    Ok(())
}
