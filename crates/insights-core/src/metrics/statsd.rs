//! Push-based meter sending DogStatsD packets to a local agent.

use cadence::prelude::*;
use cadence::{QueuingMetricSink, StatsdClient, UdpMetricSink};
use serde::{Deserialize, Serialize};
use std::net::UdpSocket;
use std::sync::Arc;
use std::time::Duration;

use super::{check, resolve_labels, Meter, MeterBuilder, MetricOp};
use crate::attrs::{AttrBag, AttrMap, AttrValue};
use crate::catalog::{MetricCatalog, MetricKind};
use crate::error::{BackendError, MetricError};
use crate::flush::Flusher;

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    8125
}

fn default_queue_size() -> usize {
    1024
}

fn default_flush_timeout_ms() -> u64 {
    2000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsdConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    #[serde(default = "default_flush_timeout_ms")]
    pub flush_timeout_ms: u64,
}

impl Default for StatsdConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_host(),
            port: default_port(),
            prefix: String::new(),
            queue_size: default_queue_size(),
            flush_timeout_ms: default_flush_timeout_ms(),
        }
    }
}

struct StatsdShared {
    client: StatsdClient,
    catalog: Arc<MetricCatalog>,
}

/// Sends counters as `count`, histograms as `histogram` and distributions as
/// `distribution`, with labels as `key:value` tags.
///
/// Packets are queued and sent from a background thread. DogStatsD counts
/// are integers, so fractional counter deltas are rejected. Dimensions
/// without a value are left out.
pub struct StatsdMeter {
    shared: Arc<StatsdShared>,
    labels: AttrBag,
}

impl StatsdMeter {
    pub fn builder(
        conf: &StatsdConfig,
        catalog: Arc<MetricCatalog>,
    ) -> Result<(MeterBuilder, Flusher), BackendError> {
        if conf.host.is_empty() {
            return Err(BackendError::Missing {
                backend: "statsd",
                field: "host",
            });
        }
        let io = |source| BackendError::Io {
            backend: "statsd",
            source,
        };
        let socket = UdpSocket::bind(("0.0.0.0", 0)).map_err(io)?;
        socket.set_nonblocking(true).map_err(io)?;
        let udp = UdpMetricSink::from((conf.host.as_str(), conf.port), socket)
            .map_err(|e| BackendError::init("statsd", e))?;
        let sink = QueuingMetricSink::with_capacity(udp, conf.queue_size.max(1));
        let client = StatsdClient::builder(&conf.prefix, sink)
            .with_error_handler(|e| tracing::debug!(error = %e, "statsd send failed"))
            .build();

        let shared = Arc::new(StatsdShared { client, catalog });

        let mut flusher = Flusher::new();
        let flush_shared = shared.clone();
        flusher.push(
            "metrics.statsd",
            Duration::from_millis(conf.flush_timeout_ms),
            move || {
                if let Err(e) = flush_shared.client.flush() {
                    tracing::debug!(error = %e, "statsd flush failed");
                }
            },
        );

        let builder: MeterBuilder = Arc::new(move || {
            Box::new(StatsdMeter {
                shared: shared.clone(),
                labels: AttrBag::new(),
            }) as Box<dyn Meter>
        });
        Ok((builder, flusher))
    }
}

impl Meter for StatsdMeter {
    fn record(&self, key: &str, op: MetricOp, labels: Option<&AttrMap>) -> Result<(), MetricError> {
        let (_, def) = check(&self.shared.catalog, key, op)?;
        let tags: Vec<(&str, String)> = self.labels.with(|instance| {
            resolve_labels(def, labels, instance)
                .into_iter()
                .filter_map(|(k, v)| v.map(|v| (k, v)))
                .collect()
        });
        let client = &self.shared.client;

        let sent = match (&def.kind, op) {
            (MetricKind::MonotonicCounter | MetricKind::UpDownCounter, MetricOp::Add(v)) => {
                if v.fract() != 0.0 {
                    return Err(MetricError::Backend {
                        name: key.to_owned(),
                        message: format!("statsd counters take whole deltas, got {v}"),
                    });
                }
                let mut b = client.count_with_tags(key, v as i64);
                for (k, v) in &tags {
                    b = b.with_tag(k, v);
                }
                b.try_send().map(|_| ())
            }
            (MetricKind::Histogram, MetricOp::Rec(v)) => {
                let mut b = client.histogram_with_tags(key, v);
                for (k, v) in &tags {
                    b = b.with_tag(k, v);
                }
                b.try_send().map(|_| ())
            }
            (MetricKind::Distribution, MetricOp::Rec(v)) => {
                let mut b = client.distribution_with_tags(key, v);
                for (k, v) in &tags {
                    b = b.with_tag(k, v);
                }
                b.try_send().map(|_| ())
            }
            _ => {
                return Err(MetricError::Unsupported {
                    name: key.to_owned(),
                    kind: def.kind.clone(),
                })
            }
        };
        sent.map_err(|e| MetricError::Backend {
            name: key.to_owned(),
            message: e.to_string(),
        })
    }

    fn str(&self, key: &str, val: &str) {
        self.labels.set(key, AttrValue::Str(val.to_owned()));
    }

    fn labels(&self) -> AttrMap {
        self.labels.snapshot()
    }

    fn clone_meter(&self) -> Box<dyn Meter> {
        Box::new(StatsdMeter {
            shared: self.shared.clone(),
            labels: self.labels.deep_clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
