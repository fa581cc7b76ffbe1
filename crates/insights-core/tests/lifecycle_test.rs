use insights_core::catalog::{MetricDefinition, MetricKind};
use insights_core::defaults::{ATTR_HTTP_ROUTE, MET_HTTP_SERVER_REQUEST_COUNT};
use insights_core::prelude::*;
use insights_core::{create_insights, Flusher, InsighterBuilder, InsightsConfig};
use std::net::UdpSocket;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

fn file_config(dir: &tempfile::TempDir) -> InsightsConfig {
    let mut cfg = InsightsConfig::default();
    cfg.service_name = "lifecycle".into();
    cfg.logs.file = dir.path().join("app.log").display().to_string();
    cfg.prometheus.enabled = false;
    cfg
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

#[test]
fn test_nop_flush_is_immediate() {
    let ins = InsighterBuilder::nop().build();
    ins.l().info("x");
    ins.m().inc("x");
    ins.t().start_root("x").end();

    let started = Instant::now();
    let report = Flusher::new().flush();
    assert!(report.is_clean());
    assert!(started.elapsed() < Duration::from_millis(50));
}

#[test]
fn test_hung_step_does_not_block_the_rest() {
    let (tx, rx) = std::sync::mpsc::channel();
    let report = Flusher::new()
        .then("collector", Duration::from_millis(100), || {
            std::thread::sleep(Duration::from_secs(10))
        })
        .then("file", Duration::from_secs(1), move || {
            tx.send(()).unwrap();
        })
        .flush();
    assert_eq!(report.timed_out, vec!["collector"]);
    assert_eq!(report.completed, vec!["file"]);
    assert!(rx.try_recv().is_ok());
}

#[test]
fn test_logs_reach_file_after_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = file_config(&dir);
    let insights = create_insights(&cfg, &[]).unwrap();
    assert!(insights.prometheus.is_none());

    let ins = insights.insighter();
    ins.str(ATTR_HTTP_ROUTE, "/users/{id}");
    ins.l().info("handled");
    let report = insights.shutdown();
    assert_eq!(report.completed, vec!["logs.output"]);

    let text = std::fs::read_to_string(dir.path().join("app.log")).unwrap();
    let last: serde_json::Value = serde_json::from_str(text.lines().last().unwrap()).unwrap();
    assert_eq!(last["msg"], "handled");
    assert_eq!(last[ATTR_HTTP_ROUTE], "/users/{id}");
}

#[test]
fn test_statsd_backend_through_config() {
    let agent = UdpSocket::bind("127.0.0.1:0").unwrap();
    agent.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = file_config(&dir);
    cfg.statsd.enabled = true;
    cfg.statsd.port = agent.local_addr().unwrap().port();
    cfg.statsd.prefix = "svc".into();

    let app = vec![MetricDefinition::new("jobs.done", MetricKind::MonotonicCounter)];
    let insights = create_insights(&cfg, &app).unwrap();
    let steps: Vec<&str> = insights.flusher.step_names().collect();
    assert_eq!(steps, vec!["logs.output", "metrics.statsd"]);

    insights.insighter().m().inc("jobs.done");
    assert!(insights.shutdown().is_clean());

    let mut buf = [0u8; 512];
    let n = agent.recv(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"svc.jobs.done:1|c");
}

#[tokio::test]
async fn test_prometheus_endpoint_is_served() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = file_config(&dir);
    cfg.prometheus.enabled = true;
    cfg.prometheus.host = "127.0.0.1".into();
    cfg.prometheus.port = free_port();

    let insights = create_insights(&cfg, &[]).unwrap();
    let ins = insights.insighter();
    ins.str(ATTR_HTTP_ROUTE, "/health");
    ins.m().inc(MET_HTTP_SERVER_REQUEST_COUNT);

    let mut stream = None;
    for _ in 0..50 {
        match tokio::net::TcpStream::connect(("127.0.0.1", cfg.prometheus.port)).await {
            Ok(s) => {
                stream = Some(s);
                break;
            }
            Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
        }
    }
    let mut stream = stream.expect("metrics endpoint never came up");
    stream
        .write_all(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(
        response.contains(r#"http_server_request_count{http_request_method="",http_response_status_code="",http_response_status_group="",http_route="/health"} 1"#),
        "{response}"
    );
    let report = tokio::task::spawn_blocking(move || insights.shutdown())
        .await
        .unwrap();
    assert!(report.is_clean());
}

#[test]
fn test_config_file_to_insights() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("svc.log");
    let path = dir.path().join("insights.toml");
    std::fs::write(
        &path,
        format!(
            r#"
service_name = "from-toml"

[[attributes]]
name = "tenant"

[[metrics]]
name = "jobs.failed"
metric_type = "counter"
attributes = [{{ name = "tenant" }}]

[logs]
file = "{}"
level = "info"

[prometheus]
enabled = false
"#,
            log.display()
        ),
    )
    .unwrap();

    let cfg = InsightsConfig::load_from(&path).unwrap();
    let insights = create_insights(&cfg, &[]).unwrap();
    assert!(insights.catalog.def("jobs.failed", &[]).is_ok());
    let ins = insights.insighter();
    ins.str("tenant", "acme");
    ins.l().debug("filtered out");
    ins.l().info("kept");
    insights.shutdown();

    let text = std::fs::read_to_string(&log).unwrap();
    assert_eq!(text.lines().count(), 1);
    assert!(text.contains(r#""tenant":"acme""#));
}
