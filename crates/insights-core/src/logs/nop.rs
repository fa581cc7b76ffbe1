use std::sync::Arc;

use super::{Level, LogMsg, Logger, LoggerBuilder, Record};
use crate::attrs::{AttrMap, AttrValue, Attributable};

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NopLogger;

impl NopLogger {
    pub fn builder() -> LoggerBuilder {
        Arc::new(|| Box::new(NopLogger) as Box<dyn Logger>)
    }
}

impl Attributable for NopLogger {
    fn set_attr(&self, _key: &str, _val: AttrValue) {}
}

impl Logger for NopLogger {
    fn emit(&self, _record: Record) {}

    fn message(&self, _record: Record) -> LogMsg {
        LogMsg::disabled()
    }

    fn enabled(&self, _level: Level) -> bool {
        false
    }

    fn attrs(&self) -> AttrMap {
        AttrMap::new()
    }

    fn clone_logger(&self) -> Box<dyn Logger> {
        Box::new(NopLogger)
    }
}
