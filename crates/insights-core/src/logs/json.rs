use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::gelf::{GelfSender, GraylogConfig};
use super::{Level, LogMsg, Logger, LoggerBuilder, Record};
use crate::attrs::{self, AttrBag, AttrMap, AttrValue, Attributable};
use crate::error::BackendError;
use crate::flush::Flusher;

/// Keys written by the logger itself; attributes with these names are moved
/// under `fields.`.
const RESERVED: [&str; 5] = ["time", "level", "msg", "error", "caller"];

fn default_level() -> Level {
    Level::Debug
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonLoggerConfig {
    /// Output file, opened in append mode. Empty writes to stdout.
    #[serde(default)]
    pub file: String,
    #[serde(default = "default_level")]
    pub level: Level,
    #[serde(default)]
    pub graylog: GraylogConfig,
}

impl Default for JsonLoggerConfig {
    fn default() -> Self {
        Self {
            file: String::new(),
            level: default_level(),
            graylog: GraylogConfig::default(),
        }
    }
}

struct JsonShared {
    out: Mutex<Box<dyn Write + Send>>,
    min_level: Level,
    gelf: Option<GelfSender>,
}

impl JsonShared {
    fn write(&self, instance: &AttrMap, record: Record) {
        let fields = attrs::merge(instance, Some(&record.attrs));

        let mut line = serde_json::Map::new();
        line.insert("time".into(), record.time.to_rfc3339().into());
        line.insert("level".into(), record.level.as_str().into());
        line.insert("msg".into(), record.message.as_str().into());
        if let Some(err) = &record.error {
            line.insert("error".into(), err.to_string().into());
        }
        if let Some(caller) = record.caller_str() {
            line.insert("caller".into(), caller.into());
        }
        for (k, v) in &fields {
            let key = if RESERVED.contains(&k.as_str()) {
                format!("fields.{k}")
            } else {
                k.clone()
            };
            line.insert(key, v.to_json());
        }

        {
            let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
            let written = serde_json::to_writer(&mut *out, &line)
                .map_err(std::io::Error::from)
                .and_then(|_| out.write_all(b"\n"));
            if let Err(e) = written {
                tracing::debug!(error = %e, "json logger write failed");
            }
        }

        if let Some(gelf) = &self.gelf {
            gelf.send(&record, &fields);
        }

        match record.level {
            Level::Fatal => {
                self.flush();
                std::process::exit(1);
            }
            Level::Panic => panic!("{}", record.message),
            _ => {}
        }
    }

    fn flush(&self) {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = out.flush() {
            tracing::debug!(error = %e, "json logger flush failed");
        }
    }
}

/// Writes one JSON object per line and optionally forwards to Graylog.
///
/// Fatal records exit the process after writing; Panic records panic.
pub struct JsonLogger {
    shared: Arc<JsonShared>,
    attrs: AttrBag,
}

impl JsonLogger {
    /// Logger over an arbitrary writer, without a Graylog forwarder.
    pub fn with_writer(out: Box<dyn Write + Send>, min_level: Level) -> Self {
        Self {
            shared: Arc::new(JsonShared {
                out: Mutex::new(out),
                min_level,
                gelf: None,
            }),
            attrs: AttrBag::new(),
        }
    }

    /// Builder plus the flush steps for the file writer and Graylog queue.
    ///
    /// Failing to open the output or the Graylog socket is an error.
    pub fn builder(conf: &JsonLoggerConfig) -> Result<(LoggerBuilder, Flusher), BackendError> {
        let out: Box<dyn Write + Send> = if conf.file.is_empty() {
            Box::new(std::io::stdout())
        } else {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&conf.file)
                .map_err(|source| BackendError::Io {
                    backend: "json logger",
                    source,
                })?;
            Box::new(file)
        };
        let gelf = if conf.graylog.enabled {
            Some(GelfSender::connect(&conf.graylog)?)
        } else {
            None
        };
        let shared = Arc::new(JsonShared {
            out: Mutex::new(out),
            min_level: conf.level,
            gelf,
        });

        let mut flusher = Flusher::new();
        let file_shared = shared.clone();
        flusher.push("logs.output", Duration::from_secs(1), move || {
            file_shared.flush()
        });
        if conf.graylog.enabled {
            let gelf_shared = shared.clone();
            let timeout = Duration::from_millis(conf.graylog.flush_timeout_ms);
            flusher.push("logs.graylog", timeout, move || {
                if let Some(gelf) = &gelf_shared.gelf {
                    if !gelf.flush(timeout) {
                        tracing::debug!("graylog queue not drained before timeout");
                    }
                }
            });
        }

        let builder: LoggerBuilder = Arc::new(move || {
            Box::new(JsonLogger {
                shared: shared.clone(),
                attrs: AttrBag::new(),
            }) as Box<dyn Logger>
        });
        Ok((builder, flusher))
    }
}

impl Attributable for JsonLogger {
    fn set_attr(&self, key: &str, val: AttrValue) {
        self.attrs.set(key, val);
    }
}

impl Logger for JsonLogger {
    fn emit(&self, record: Record) {
        self.attrs.with(|instance| self.shared.write(instance, record));
    }

    fn message(&self, record: Record) -> LogMsg {
        let shared = self.shared.clone();
        let instance = self.attrs.snapshot();
        LogMsg::new(record, move |r| shared.write(&instance, r))
    }

    fn enabled(&self, level: Level) -> bool {
        level >= self.shared.min_level
    }

    fn attrs(&self) -> AttrMap {
        self.attrs.snapshot()
    }

    fn clone_logger(&self) -> Box<dyn Logger> {
        Box::new(JsonLogger {
            shared: self.shared.clone(),
            attrs: self.attrs.deep_clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
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

    #[test]
    fn test_record_layout() {
        let buf = SharedBuf::default();
        let logger = JsonLogger::with_writer(Box::new(buf.clone()), Level::Debug);
        logger.str("route", "/v1");
        logger.str("msg", "shadowed");
        logger.info_with("served", &crate::attr_map! { "status" => 200 });

        let lines = buf.lines();
        assert_eq!(lines.len(), 1);
        let line = &lines[0];
        assert_eq!(line["level"], "info");
        assert_eq!(line["msg"], "served");
        assert_eq!(line["route"], "/v1");
        assert_eq!(line["status"], 200);
        assert_eq!(line["fields.msg"], "shadowed");
        assert!(line["caller"].as_str().unwrap().contains(".rs:"));
    }

    #[test]
    fn test_min_level_filters() {
        let buf = SharedBuf::default();
        let logger = JsonLogger::with_writer(Box::new(buf.clone()), Level::Info);
        logger.debug("dropped");
        logger.trace_msg("dropped too").send();
        logger.warn("kept");
        assert_eq!(buf.lines().len(), 1);
    }

    #[test]
    fn test_msg_inherits_attrs_at_creation() {
        let buf = SharedBuf::default();
        let logger = JsonLogger::with_writer(Box::new(buf.clone()), Level::Debug);
        logger.str("a", "1");
        let msg = logger.info_msg("deferred").str("b", "2");
        logger.str("a", "changed");
        msg.send();

        let lines = buf.lines();
        assert_eq!(lines[0]["a"], "1");
        assert_eq!(lines[0]["b"], "2");
    }

    #[test]
    #[should_panic(expected = "boom")]
    fn test_panic_level_panics() {
        let logger = JsonLogger::with_writer(Box::new(SharedBuf::default()), Level::Debug);
        logger.panic("boom");
    }

    #[test]
    fn test_builder_opens_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        let conf = JsonLoggerConfig {
            file: path.to_string_lossy().into_owned(),
            ..Default::default()
        };
        let (builder, flusher) = JsonLogger::builder(&conf).unwrap();
        builder().info("to file");
        flusher.flush();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("to file"));
    }

    #[test]
    fn test_builder_bad_path_is_error() {
        let conf = JsonLoggerConfig {
            file: "/nonexistent-dir/for/sure/out.log".into(),
            ..Default::default()
        };
        assert!(matches!(
            JsonLogger::builder(&conf),
            Err(BackendError::Io { .. })
        ));
    }
}
