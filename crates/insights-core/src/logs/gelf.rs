//! Asynchronous GELF 1.1 forwarding over UDP.
//!
//! Records are encoded on the caller's thread and queued on a bounded
//! channel; a background thread owns the socket and sends them, chunked when
//! they do not fit one datagram. A full queue drops the record.

use serde::{Deserialize, Serialize};
use std::net::UdpSocket;
use std::time::Duration;

use super::{Level, Record};
use crate::attrs::AttrMap;
use crate::error::BackendError;

/// Largest datagram sent, chunk header included.
pub const CHUNK_SIZE: usize = 8192;
const CHUNK_HEADER: usize = 12;
const MAX_CHUNKS: usize = 128;
const CHUNK_MAGIC: [u8; 2] = [0x1e, 0x0f];

fn default_port() -> u16 {
    12201
}

fn default_queue_size() -> usize {
    1024
}

fn default_flush_timeout_ms() -> u64 {
    2000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraylogConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Prepended as `<prefix>-<name>` to every field except `error` and
    /// names starting with `g-`.
    #[serde(default)]
    pub field_prefix: String,
    /// Value of the GELF `host` field. Defaults to `$HOSTNAME`.
    #[serde(default)]
    pub source: String,
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    #[serde(default = "default_flush_timeout_ms")]
    pub flush_timeout_ms: u64,
}

impl Default for GraylogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: String::new(),
            port: default_port(),
            field_prefix: String::new(),
            source: String::new(),
            queue_size: default_queue_size(),
            flush_timeout_ms: default_flush_timeout_ms(),
        }
    }
}

enum Command {
    Send(Vec<u8>),
    Flush(flume::Sender<()>),
}

pub struct GelfSender {
    tx: flume::Sender<Command>,
    source: String,
    field_prefix: String,
}

impl GelfSender {
    pub fn connect(conf: &GraylogConfig) -> Result<Self, BackendError> {
        if conf.host.is_empty() {
            return Err(BackendError::Missing {
                backend: "graylog",
                field: "host",
            });
        }
        let io = |source| BackendError::Io {
            backend: "graylog",
            source,
        };
        let socket = UdpSocket::bind(("0.0.0.0", 0)).map_err(io)?;
        socket.connect((conf.host.as_str(), conf.port)).map_err(io)?;

        let (tx, rx) = flume::bounded(conf.queue_size.max(1));
        std::thread::Builder::new()
            .name("gelf-sender".into())
            .spawn(move || run_sender(socket, rx))
            .map_err(io)?;

        let source = if conf.source.is_empty() {
            std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".into())
        } else {
            conf.source.clone()
        };
        Ok(Self {
            tx,
            source,
            field_prefix: conf.field_prefix.clone(),
        })
    }

    /// Queue a record with its merged attributes.
    pub fn send(&self, record: &Record, fields: &AttrMap) {
        let payload = match serde_json::to_vec(&self.encode(record, fields)) {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!(error = %e, "gelf encode failed");
                return;
            }
        };
        if self.tx.try_send(Command::Send(payload)).is_err() {
            tracing::debug!("gelf queue full or closed, record dropped");
        }
    }

    /// Wait until everything queued before this call was sent.
    pub fn flush(&self, timeout: Duration) -> bool {
        let (ack_tx, ack_rx) = flume::bounded(1);
        if self.tx.send_timeout(Command::Flush(ack_tx), timeout).is_err() {
            return false;
        }
        ack_rx.recv_timeout(timeout).is_ok()
    }

    pub fn encode(&self, record: &Record, fields: &AttrMap) -> serde_json::Value {
        let mut msg = serde_json::Map::new();
        msg.insert("version".into(), "1.1".into());
        msg.insert("host".into(), self.source.as_str().into());
        msg.insert("short_message".into(), record.message.as_str().into());
        msg.insert(
            "timestamp".into(),
            (record.time.timestamp_millis() as f64 / 1000.0).into(),
        );
        msg.insert("level".into(), syslog_level(record.level).into());
        if let Some(caller) = record.caller {
            msg.insert("_file".into(), caller.file().into());
            msg.insert("_line".into(), caller.line().into());
        }
        if let Some(err) = &record.error {
            msg.insert("_error".into(), err.to_string().into());
        }
        for (k, v) in fields {
            let name = field_name(&self.field_prefix, k);
            msg.insert(format!("_{name}"), v.to_json());
        }
        serde_json::Value::Object(msg)
    }
}

fn run_sender(socket: UdpSocket, rx: flume::Receiver<Command>) {
    for cmd in rx.iter() {
        match cmd {
            Command::Send(payload) => {
                let id = message_id();
                let Some(chunks) = chunk_payload(id, &payload, CHUNK_SIZE) else {
                    tracing::debug!(bytes = payload.len(), "gelf message too large, dropped");
                    continue;
                };
                for chunk in chunks {
                    if let Err(e) = socket.send(&chunk) {
                        tracing::debug!(error = %e, "gelf send failed");
                        break;
                    }
                }
            }
            Command::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
}

fn message_id() -> [u8; 8] {
    let mut id = [0u8; 8];
    id.copy_from_slice(&uuid::Uuid::new_v4().as_bytes()[..8]);
    id
}

/// Split `payload` into datagrams of at most `chunk_size` bytes.
///
/// A payload that fits is returned unchanged. `None` when more than 128
/// chunks would be needed.
pub fn chunk_payload(id: [u8; 8], payload: &[u8], chunk_size: usize) -> Option<Vec<Vec<u8>>> {
    if payload.len() <= chunk_size {
        return Some(vec![payload.to_vec()]);
    }
    let data_size = chunk_size.checked_sub(CHUNK_HEADER).filter(|&n| n > 0)?;
    let count = payload.len().div_ceil(data_size);
    if count > MAX_CHUNKS {
        return None;
    }
    let chunks = payload
        .chunks(data_size)
        .enumerate()
        .map(|(seq, data)| {
            let mut chunk = Vec::with_capacity(CHUNK_HEADER + data.len());
            chunk.extend_from_slice(&CHUNK_MAGIC);
            chunk.extend_from_slice(&id);
            chunk.push(seq as u8);
            chunk.push(count as u8);
            chunk.extend_from_slice(data);
            chunk
        })
        .collect();
    Some(chunks)
}

/// GELF additional field name for attribute `key`, without the leading `_`.
pub fn field_name(prefix: &str, key: &str) -> String {
    let name = if !prefix.is_empty() && key != "error" && !key.starts_with("g-") {
        format!("{prefix}-{key}")
    } else {
        key.to_owned()
    };
    let name: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    // `_id` is reserved by GELF.
    if name == "id" {
        "id_".into()
    } else {
        name
    }
}

fn syslog_level(level: Level) -> u8 {
    match level {
        Level::Panic => 0,
        Level::Fatal => 2,
        Level::Error => 3,
        Level::Warn => 4,
        Level::Info => 6,
        Level::Debug | Level::Trace => 7,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_name_prefix_rules() {
        assert_eq!(field_name("svc", "route"), "svc-route");
        assert_eq!(field_name("svc", "error"), "error");
        assert_eq!(field_name("svc", "g-kept"), "g-kept");
        assert_eq!(field_name("", "http route/x"), "http_route_x");
        assert_eq!(field_name("", "id"), "id_");
    }

    #[test]
    fn test_small_payload_not_chunked() {
        let chunks = chunk_payload([1; 8], b"short", CHUNK_SIZE).unwrap();
        assert_eq!(chunks, vec![b"short".to_vec()]);
    }

    #[test]
    fn test_chunk_headers() {
        let payload = vec![7u8; 50];
        let chunks = chunk_payload([9; 8], &payload, 32).unwrap();
        // 20 data bytes per chunk
        assert_eq!(chunks.len(), 3);
        for (seq, chunk) in chunks.iter().enumerate() {
            assert_eq!(&chunk[..2], &CHUNK_MAGIC);
            assert_eq!(&chunk[2..10], &[9; 8]);
            assert_eq!(chunk[10] as usize, seq);
            assert_eq!(chunk[11], 3);
        }
        let data: usize = chunks.iter().map(|c| c.len() - CHUNK_HEADER).sum();
        assert_eq!(data, payload.len());
    }

    #[test]
    fn test_too_many_chunks_dropped() {
        let payload = vec![0u8; 13 * 129];
        assert!(chunk_payload([0; 8], &payload, 25).is_none());
    }

    #[test]
    fn test_missing_host_is_config_error() {
        let conf = GraylogConfig {
            enabled: true,
            ..Default::default()
        };
        assert!(matches!(
            GelfSender::connect(&conf),
            Err(BackendError::Missing { field: "host", .. })
        ));
    }
}
