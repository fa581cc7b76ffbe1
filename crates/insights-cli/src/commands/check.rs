use std::path::Path;

use insights_core::{metric_definitions, AttributeSet, InsightsConfig, MetricCatalog};

/// Definitions that survived validation, and why the rest were dropped.
#[derive(Debug, Default)]
pub struct CheckReport {
    pub attributes: usize,
    pub metrics: usize,
    pub errors: Vec<String>,
}

pub fn inspect(cfg: &InsightsConfig) -> CheckReport {
    let (attrs, attr_errors) = AttributeSet::new(&cfg.attributes);
    let (definitions, mut metric_errors) = metric_definitions(cfg, &[]);
    let (catalog, build_errors) = MetricCatalog::build(&definitions);
    metric_errors.extend(build_errors);

    let errors = attr_errors
        .iter()
        .map(|e| format!("attribute: {e}"))
        .chain(metric_errors.iter().map(|e| format!("metric: {e}")))
        .collect();
    CheckReport {
        attributes: attrs.len(),
        metrics: catalog.len(),
        errors,
    }
}

pub fn run(config: Option<&Path>) -> anyhow::Result<()> {
    let cfg = super::load_config(config)?;
    let report = inspect(&cfg);

    for e in &report.errors {
        println!("  [FAIL] {e}");
    }
    println!(
        "{}: {} attributes, {} metrics, {} dropped",
        cfg.service_name,
        report.attributes,
        report.metrics,
        report.errors.len()
    );

    if !report.errors.is_empty() {
        anyhow::bail!("{} definition(s) dropped", report.errors.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use insights_core::{AttributeDefinition, MetricDefinition, MetricKind};

    #[test]
    fn test_defaults_are_clean() {
        let report = inspect(&InsightsConfig::default());
        assert!(report.errors.is_empty());
        assert_eq!(report.metrics, 4);
        assert!(report.attributes > 0);
    }

    #[test]
    fn test_every_error_is_listed() {
        let mut cfg = InsightsConfig::default();
        cfg.attributes.push(AttributeDefinition::str(""));
        cfg.metrics = vec![
            MetricDefinition::new("", MetricKind::Histogram),
            MetricDefinition::new("jobs", MetricKind::Histogram)
                .with_attributes(vec![AttributeDefinition::str("")]),
        ];

        let report = inspect(&cfg);
        assert_eq!(report.errors.len(), 3);
        assert_eq!(report.metrics, 5);
        assert!(report.errors[0].starts_with("attribute: "));
        assert!(report.errors[1..].iter().all(|e| e.starts_with("metric: ")));
    }

    #[test]
    fn test_invalid_config_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("insights.toml");
        std::fs::write(&path, "service_name = \"\"\n").unwrap();
        let err = run(Some(&path)).unwrap_err();
        assert!(format!("{err:#}").contains("service_name is empty"));
    }
}
