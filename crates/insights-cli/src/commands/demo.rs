use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use insights_core::context;
use insights_core::defaults::{
    status_group, ATTR_APP, ATTR_HTTP_DURATION, ATTR_HTTP_METHOD, ATTR_HTTP_REQUEST_ID,
    ATTR_HTTP_ROUTE, ATTR_HTTP_STATUS, ATTR_HTTP_STATUS_GROUP, MET_HTTP_SERVER_REQUEST_COUNT,
    MET_HTTP_SERVER_REQUEST_DURATION,
};
use insights_core::prelude::*;
use insights_core::{create_insights, InsighterBuilder};

const ROUTES: &[(&str, &str)] = &[
    ("GET", "/users/{id}"),
    ("POST", "/orders"),
    ("GET", "/health"),
];

pub async fn run(config: Option<&Path>, requests: usize, workers: usize) -> anyhow::Result<()> {
    let cfg = super::load_config(config)?;
    let insights = create_insights(&cfg, &[]).context("building telemetry backends")?;

    let served = simulate(&insights.builder, requests, workers).await?;

    if let Some(prometheus) = &insights.prometheus {
        println!("{}", prometheus.render());
    }

    // flush steps block on their own threads
    let report = tokio::task::spawn_blocking(move || insights.shutdown())
        .await
        .context("flush task panicked")?;
    println!("{served} requests served; flush: {report}");
    if !report.is_clean() {
        anyhow::bail!("flush incomplete: {report}");
    }
    Ok(())
}

/// Serve `requests` fake requests on `workers` tasks. Each request gets its
/// own clone of one base Insighter, attached to the task while it runs.
pub async fn simulate(
    builder: &InsighterBuilder,
    requests: usize,
    workers: usize,
) -> anyhow::Result<usize> {
    let workers = workers.clamp(1, requests.max(1));
    let base = Arc::new(builder.build());
    base.str(ATTR_APP, "insights-demo");

    let mut tasks = Vec::with_capacity(workers);
    for worker in 0..workers {
        let base = base.clone();
        tasks.push(tokio::spawn(async move {
            let mut served = 0usize;
            for i in (worker..requests).step_by(workers) {
                let ins = Arc::new(base.as_ref().clone());
                context::scope(ins, handle(i)).await;
                served += 1;
            }
            served
        }));
    }

    let mut total = 0;
    for task in tasks {
        total += task.await.context("demo worker panicked")?;
    }
    Ok(total)
}

async fn handle(i: usize) {
    let ins = context::current();
    let (method, route) = ROUTES[i % ROUTES.len()];
    ins.str(ATTR_HTTP_METHOD, method);
    ins.str(ATTR_HTTP_ROUTE, route);
    ins.str(ATTR_HTTP_REQUEST_ID, &format!("demo-{i:05}"));

    let started = Instant::now();
    let span = ins.t().start_root(&format!("{method} {route}"));
    tokio::time::sleep(Duration::from_millis((i % 7) as u64 + 1)).await;

    // every tenth request fails
    let status: u16 = if i % 10 == 9 { 500 } else { 200 };
    let elapsed = started.elapsed().as_secs_f64();
    ins.i64(ATTR_HTTP_STATUS, i64::from(status));
    ins.str(ATTR_HTTP_STATUS_GROUP, &status_group(status));
    ins.f64(ATTR_HTTP_DURATION, elapsed);
    span.i64(ATTR_HTTP_STATUS, i64::from(status));

    if status >= 500 {
        let err = std::io::Error::other("simulated upstream failure");
        span.err(&err);
        ins.l().err(&err, "request failed");
    } else {
        ins.l().info("request");
    }
    span.end();

    ins.m().inc(MET_HTTP_SERVER_REQUEST_COUNT);
    ins.m().rec(MET_HTTP_SERVER_REQUEST_DURATION, elapsed);
}
