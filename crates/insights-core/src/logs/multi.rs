use std::sync::Arc;

use super::{Level, LogMsg, Logger, LoggerBuilder, Record};
use crate::attrs::{AttrMap, AttrValue, Attributable};
use crate::error::BackendError;

/// Forwards every call to each wrapped logger, in order.
///
/// A wrapped logger that exits or panics on Fatal/Panic stops the
/// remaining ones from seeing that record.
pub struct MultiLogger {
    loggers: Vec<Box<dyn Logger>>,
}

impl MultiLogger {
    pub fn new(loggers: Vec<Box<dyn Logger>>) -> Self {
        Self { loggers }
    }

    /// Combine builders, skipping the ones that failed to construct.
    pub fn builder<I>(builders: I) -> LoggerBuilder
    where
        I: IntoIterator<Item = Result<LoggerBuilder, BackendError>>,
    {
        let builders: Vec<LoggerBuilder> = builders
            .into_iter()
            .filter_map(|b| {
                b.map_err(|e| tracing::warn!(error = %e, "logger backend skipped"))
                    .ok()
            })
            .collect();
        Arc::new(move || {
            Box::new(MultiLogger::new(builders.iter().map(|b| b()).collect())) as Box<dyn Logger>
        })
    }

    pub fn len(&self) -> usize {
        self.loggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loggers.is_empty()
    }
}

impl Attributable for MultiLogger {
    fn set_attr(&self, key: &str, val: AttrValue) {
        for l in &self.loggers {
            l.set_attr(key, val.clone());
        }
    }
}

impl Logger for MultiLogger {
    fn emit(&self, record: Record) {
        for l in &self.loggers {
            if l.enabled(record.level) {
                l.emit(record.clone());
            }
        }
    }

    fn message(&self, record: Record) -> LogMsg {
        let level = record.level;
        let parts: Vec<LogMsg> = self
            .loggers
            .iter()
            .filter(|l| l.enabled(level))
            .map(|l| l.message(record.clone()))
            .filter(LogMsg::is_enabled)
            .collect();
        if parts.is_empty() {
            return LogMsg::disabled();
        }
        LogMsg::new(record, move |sent: Record| {
            for part in parts {
                if let Some((mut r, sink)) = part.into_parts() {
                    r.attrs.extend(sent.attrs.iter().map(|(k, v)| (k.clone(), v.clone())));
                    sink(r);
                }
            }
        })
    }

    fn enabled(&self, level: Level) -> bool {
        self.loggers.iter().any(|l| l.enabled(level))
    }

    /// Attributes of the first wrapped logger that keeps any.
    fn attrs(&self) -> AttrMap {
        self.loggers
            .iter()
            .map(|l| l.attrs())
            .find(|a| !a.is_empty())
            .unwrap_or_default()
    }

    fn clone_logger(&self) -> Box<dyn Logger> {
        Box::new(MultiLogger::new(
            self.loggers.iter().map(|l| l.clone_logger()).collect(),
        ))
    }
}
