use insights_core::attrs::{AttrKind, AttrValue, AttributeDefinition};
use insights_core::catalog::{MetricCatalog, MetricDefinition, MetricKind};
use insights_core::context;
use insights_core::logs::{JsonLogger, Level, Logger, LoggerBuilder};
use insights_core::metrics::{MetricOp, MockMeter, MockRecorder};
use insights_core::prelude::*;
use insights_core::traces::{NopTracer, OtelTracer, TracerBuilder};
use insights_core::{Insighter, InsighterBuilder};
use opentelemetry_sdk::trace::TracerProvider;
use std::io::Write;
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl SharedBuf {
    fn lines(&self) -> Vec<serde_json::Value> {
        let buf = self.0.lock().unwrap();
        String::from_utf8_lossy(&buf)
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }
}

fn attributes() -> Vec<AttributeDefinition> {
    vec![
        AttributeDefinition::str("path"),
        AttributeDefinition::new("req_id", AttrKind::I64),
    ]
}

fn catalog() -> Arc<MetricCatalog> {
    let defs = vec![MetricDefinition::new("requests", MetricKind::MonotonicCounter)
        .with_attributes(vec![AttributeDefinition::str("path")])];
    Arc::new(MetricCatalog::build(&defs).0)
}

fn json_builder(buf: &SharedBuf) -> LoggerBuilder {
    let buf = buf.clone();
    Arc::new(move || {
        Box::new(JsonLogger::with_writer(Box::new(buf.clone()), Level::Debug)) as Box<dyn Logger>
    })
}

fn otel_builder() -> TracerBuilder {
    let origin = Arc::new(OtelTracer::from_provider(TracerProvider::builder().build(), "test"));
    Arc::new(move || origin.clone_tracer())
}

#[test]
fn test_path_label_reaches_metric() {
    let recorder = MockRecorder::new();
    let buf = SharedBuf::default();
    let (builder, errors) = InsighterBuilder::new(
        &attributes(),
        json_builder(&buf),
        MockMeter::builder(recorder.clone(), Some(catalog())),
        NopTracer::builder(),
    );
    assert!(errors.is_empty());

    let ins = builder.build();
    ins.str("path", "/v1/foo");
    ins.i64("req_id", 42);
    ins.m().inc("requests");
    ins.l().info("served");

    let recs = recorder.for_key("requests");
    assert_eq!(recs.len(), 1);
    assert_eq!(recs[0].op, MetricOp::Add(1.0));
    assert_eq!(recs[0].labels["path"], AttrValue::from("/v1/foo"));
    assert!(!recs[0].labels.contains_key("req_id"));

    let line = &buf.lines()[0];
    assert_eq!(line["path"], "/v1/foo");
    assert_eq!(line["req_id"], 42);
}

#[test]
fn test_mistyped_value_is_dropped() {
    let recorder = MockRecorder::new();
    let buf = SharedBuf::default();
    let (builder, _) = InsighterBuilder::new(
        &attributes(),
        json_builder(&buf),
        MockMeter::builder(recorder.clone(), None),
        NopTracer::builder(),
    );
    let ins = builder.build();
    ins.str("req_id", "42");
    ins.str("undeclared", "x");

    assert!(ins.l().attrs().is_empty());
    assert!(ins.m().labels().is_empty());
    // both rejections are reported at debug level through the logger
    let lines = buf.lines();
    assert_eq!(lines.len(), 2);
    assert!(lines.iter().all(|l| l["level"] == "debug"));
    assert_eq!(lines[1]["attribute"], "undeclared");
}

#[test]
fn test_clone_isolates_all_signals() {
    let recorder = MockRecorder::new();
    let buf = SharedBuf::default();
    let (builder, _) = InsighterBuilder::new(
        &attributes(),
        json_builder(&buf),
        MockMeter::builder(recorder.clone(), None),
        otel_builder(),
    );
    let original = builder.build();
    original.str("path", "/orig");

    let clone = original.clone();
    clone.str("path", "/clone");
    clone.i64("req_id", 7);

    assert_eq!(original.l().attrs()["path"], AttrValue::from("/orig"));
    assert_eq!(original.m().labels()["path"], AttrValue::from("/orig"));
    assert_eq!(original.t().attrs()["path"], AttrValue::from("/orig"));
    assert!(!original.l().attrs().contains_key("req_id"));
    assert!(!original.t().attrs().contains_key("req_id"));

    assert_eq!(clone.l().attrs()["path"], AttrValue::from("/clone"));
    assert_eq!(clone.m().labels()["path"], AttrValue::from("/clone"));
    assert_eq!(clone.t().attrs()["req_id"], AttrValue::from(7i64));

    // backends stay shared
    original.m().inc("hits");
    clone.m().inc("hits");
    assert_eq!(recorder.for_key("hits").len(), 2);
}

#[test]
fn test_clone_with_replaces_parts() {
    let recorder = MockRecorder::new();
    let (builder, _) = InsighterBuilder::new(
        &attributes(),
        json_builder(&SharedBuf::default()),
        MockMeter::builder(recorder.clone(), None),
        NopTracer::builder(),
    );
    let ins = builder.build();
    ins.str("path", "/a");

    let other = MockRecorder::new();
    let swapped = ins.clone_with(None, Some(Box::new(MockMeter::new(other.clone(), None))), None);
    swapped.m().inc("x");
    assert!(recorder.records().is_empty());
    assert_eq!(other.records().len(), 1);
    assert!(other.records()[0].labels.is_empty());
    assert_eq!(swapped.l().attrs()["path"], AttrValue::from("/a"));
}

#[test]
fn test_nop_insighter_is_inert() {
    let ins = InsighterBuilder::nop().build();
    ins.str("anything", "x");
    ins.i64("n", 1);
    ins.l().info("nothing");
    ins.l().warn_msg("nothing").str("k", "v").send();
    ins.m().inc("nothing");
    ins.m().rec("nothing", 1.0);
    let span = ins.t().start_root("nothing");
    span.str("k", "v");
    span.end();
    assert!(ins.l().attrs().is_empty());
    assert!(ins.m().labels().is_empty());
    assert!(ins.t().attrs().is_empty());
}

#[tokio::test]
async fn test_scoped_insighters_per_task() {
    let recorder = MockRecorder::new();
    let (builder, _) = InsighterBuilder::new(
        &attributes(),
        json_builder(&SharedBuf::default()),
        MockMeter::builder(recorder.clone(), None),
        NopTracer::builder(),
    );
    let base = builder.build();

    let mut tasks = Vec::new();
    for i in 0..4 {
        let ins: Insighter = base.clone();
        ins.str("path", &format!("/job/{i}"));
        tasks.push(tokio::spawn(context::scope(Arc::new(ins), async {
            tokio::task::yield_now().await;
            context::current().m().inc("jobs");
        })));
    }
    for t in tasks {
        t.await.unwrap();
    }

    let mut paths: Vec<String> = recorder
        .for_key("jobs")
        .iter()
        .map(|r| r.labels["path"].to_string())
        .collect();
    paths.sort();
    assert_eq!(paths, vec!["/job/0", "/job/1", "/job/2", "/job/3"]);
}
