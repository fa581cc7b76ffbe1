use insights_core::logging::{self, DiagFormat};

#[test]
fn test_init_is_idempotent() {
    // whichever test runs first installs the subscriber; later calls are no-ops
    logging::init_logging("insights-test", "debug");
    logging::init_logging("insights-test", "info");
    assert!(!logging::init("insights-test", "info", DiagFormat::Human));

    tracing::info!(key = "value", "human-readable diagnostics");
}

#[test]
fn test_init_json_after_human_is_noop() {
    logging::init_logging("insights-test", "debug");
    logging::init_logging_json("insights-test-json", "info");
    tracing::info!(key = "value", "json diagnostics");
}

#[test]
fn test_format_parsing() {
    assert_eq!("json".parse::<DiagFormat>(), Ok(DiagFormat::Json));
    assert_eq!("Pretty".parse::<DiagFormat>(), Ok(DiagFormat::Human));
    assert!("xml".parse::<DiagFormat>().is_err());
}
