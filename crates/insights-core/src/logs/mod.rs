//! Leveled, attributed log records and the loggers that emit them.
//!
//! A [`Logger`] either emits a record immediately (`info`, `err`, ...) or
//! hands back a [`LogMsg`] that collects attributes until [`LogMsg::send`].
//! Loggers keep their own attribute bag; [`Logger::clone_logger`] gives the
//! clone a private copy of it while the output backend stays shared.

pub mod gelf;
pub mod json;
pub mod multi;
pub mod nop;
pub mod sentry;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::panic::Location;
use std::str::FromStr;
use std::sync::Arc;

use crate::attrs::{AttrMap, AttrValue, Attributable};

pub use json::{JsonLogger, JsonLoggerConfig};
pub use multi::MultiLogger;
pub use nop::NopLogger;
pub use self::sentry::{EventSink, SentryConfig, SentryLogger};

/// Produces a fresh logger for each unit of work.
pub type LoggerBuilder = Arc<dyn Fn() -> Box<dyn Logger> + Send + Sync>;

// ---------------------------------------------------------------------------
// Level
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
    Panic,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Fatal => "fatal",
            Self::Panic => "panic",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" | "err" => Ok(Self::Error),
            "fatal" => Ok(Self::Fatal),
            "panic" => Ok(Self::Panic),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

impl TryFrom<String> for Level {
    type Error = String;

    fn try_from(s: String) -> Result<Self, <Level as TryFrom<String>>::Error> {
        s.parse()
    }
}

impl From<Level> for String {
    fn from(level: Level) -> Self {
        level.as_str().to_owned()
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// An error flattened to its message and the messages of its sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub message: String,
    pub chain: Vec<String>,
}

impl ErrorInfo {
    pub fn from_error(err: &dyn Error) -> Self {
        let mut chain = Vec::new();
        let mut source = err.source();
        while let Some(e) = source {
            chain.push(e.to_string());
            source = e.source();
        }
        Self {
            message: err.to_string(),
            chain,
        }
    }

    /// Message of the innermost source.
    pub fn root_cause(&self) -> &str {
        self.chain.last().unwrap_or(&self.message)
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        for cause in &self.chain {
            write!(f, ": {cause}")?;
        }
        Ok(())
    }
}

/// One log record. `attrs` holds only the call-scoped attributes; the
/// emitting logger layers them over its own.
#[derive(Debug, Clone)]
pub struct Record {
    pub level: Level,
    pub message: String,
    pub error: Option<ErrorInfo>,
    pub attrs: AttrMap,
    pub caller: Option<&'static Location<'static>>,
    pub time: DateTime<Utc>,
}

impl Record {
    pub fn new(level: Level, message: &str) -> Self {
        Self {
            level,
            message: message.to_owned(),
            error: None,
            attrs: AttrMap::new(),
            caller: None,
            time: Utc::now(),
        }
    }

    pub fn with_error(mut self, err: Option<&dyn Error>) -> Self {
        self.error = err.map(ErrorInfo::from_error);
        self
    }

    pub fn with_attrs(mut self, attrs: Option<&AttrMap>) -> Self {
        if let Some(attrs) = attrs {
            self.attrs = attrs.clone();
        }
        self
    }

    pub fn at(mut self, caller: &'static Location<'static>) -> Self {
        self.caller = Some(caller);
        self
    }

    /// `file:line` of the call site.
    pub fn caller_str(&self) -> Option<String> {
        self.caller.map(|l| format!("{}:{}", l.file(), l.line()))
    }
}

// ---------------------------------------------------------------------------
// LogMsg
// ---------------------------------------------------------------------------

type MsgSink = Box<dyn FnOnce(Record) + Send>;

/// A record being built. Nothing is emitted until [`send`](Self::send), and
/// dropping the message discards it. `send` consumes the message, so it can
/// only happen once.
#[must_use = "a LogMsg is only emitted by `send`"]
pub struct LogMsg {
    inner: Option<(Record, MsgSink)>,
}

impl LogMsg {
    pub fn new(record: Record, sink: impl FnOnce(Record) + Send + 'static) -> Self {
        Self {
            inner: Some((record, Box::new(sink))),
        }
    }

    /// A message that ignores every call. Allocates nothing.
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    fn push(mut self, key: &str, val: impl FnOnce() -> AttrValue) -> Self {
        if let Some((record, _)) = self.inner.as_mut() {
            record.attrs.insert(key.to_owned(), val());
        }
        self
    }

    pub fn str(self, key: &str, val: &str) -> Self {
        self.push(key, || AttrValue::Str(val.to_owned()))
    }

    pub fn i64(self, key: &str, val: i64) -> Self {
        self.push(key, || AttrValue::I64(val))
    }

    pub fn f64(self, key: &str, val: f64) -> Self {
        self.push(key, || AttrValue::F64(val))
    }

    pub fn bool(self, key: &str, val: bool) -> Self {
        self.push(key, || AttrValue::Bool(val))
    }

    pub fn attrs(mut self, attrs: &AttrMap) -> Self {
        if let Some((record, _)) = self.inner.as_mut() {
            for (k, v) in attrs {
                record.attrs.insert(k.clone(), v.clone());
            }
        }
        self
    }

    pub fn send(self) {
        if let Some((record, sink)) = self.inner {
            sink(record);
        }
    }

    /// Take the record out without emitting it.
    pub(crate) fn into_parts(self) -> Option<(Record, MsgSink)> {
        self.inner
    }
}

impl fmt::Debug for LogMsg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogMsg")
            .field("record", &self.inner.as_ref().map(|(r, _)| r))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Logger
// ---------------------------------------------------------------------------

pub trait Logger: Attributable + Send + Sync {
    /// Emit a record now, merged over the logger's attributes.
    fn emit(&self, record: Record);

    /// Wrap `record` in a deferred message bound to this logger.
    fn message(&self, record: Record) -> LogMsg;

    /// Whether records at `level` can have any effect.
    fn enabled(&self, _level: Level) -> bool {
        true
    }

    /// Snapshot of the accumulated attributes.
    fn attrs(&self) -> AttrMap;

    /// A logger sharing this one's backend with a private copy of its attributes.
    fn clone_logger(&self) -> Box<dyn Logger>;

    #[track_caller]
    fn log(&self, level: Level, err: Option<&dyn Error>, msg: &str, attrs: Option<&AttrMap>) {
        if !self.enabled(level) {
            return;
        }
        let record = Record::new(level, msg)
            .with_error(err)
            .with_attrs(attrs)
            .at(Location::caller());
        self.emit(record);
    }

    #[track_caller]
    fn msg(&self, level: Level, err: Option<&dyn Error>, msg: &str) -> LogMsg {
        if !self.enabled(level) {
            return LogMsg::disabled();
        }
        self.message(Record::new(level, msg).with_error(err).at(Location::caller()))
    }

    #[track_caller]
    fn trace(&self, msg: &str) {
        self.log(Level::Trace, None, msg, None);
    }

    #[track_caller]
    fn debug(&self, msg: &str) {
        self.log(Level::Debug, None, msg, None);
    }

    #[track_caller]
    fn info(&self, msg: &str) {
        self.log(Level::Info, None, msg, None);
    }

    #[track_caller]
    fn warn(&self, msg: &str) {
        self.log(Level::Warn, None, msg, None);
    }

    #[track_caller]
    fn err(&self, err: &dyn Error, msg: &str) {
        self.log(Level::Error, Some(err), msg, None);
    }

    #[track_caller]
    fn fatal(&self, msg: &str) {
        self.log(Level::Fatal, None, msg, None);
    }

    #[track_caller]
    fn panic(&self, msg: &str) {
        self.log(Level::Panic, None, msg, None);
    }

    #[track_caller]
    fn debug_with(&self, msg: &str, attrs: &AttrMap) {
        self.log(Level::Debug, None, msg, Some(attrs));
    }

    #[track_caller]
    fn info_with(&self, msg: &str, attrs: &AttrMap) {
        self.log(Level::Info, None, msg, Some(attrs));
    }

    #[track_caller]
    fn warn_with(&self, msg: &str, attrs: &AttrMap) {
        self.log(Level::Warn, None, msg, Some(attrs));
    }

    #[track_caller]
    fn err_with(&self, err: &dyn Error, msg: &str, attrs: &AttrMap) {
        self.log(Level::Error, Some(err), msg, Some(attrs));
    }

    #[track_caller]
    fn trace_msg(&self, msg: &str) -> LogMsg {
        self.msg(Level::Trace, None, msg)
    }

    #[track_caller]
    fn debug_msg(&self, msg: &str) -> LogMsg {
        self.msg(Level::Debug, None, msg)
    }

    #[track_caller]
    fn info_msg(&self, msg: &str) -> LogMsg {
        self.msg(Level::Info, None, msg)
    }

    #[track_caller]
    fn warn_msg(&self, msg: &str) -> LogMsg {
        self.msg(Level::Warn, None, msg)
    }

    #[track_caller]
    fn err_msg(&self, err: &dyn Error, msg: &str) -> LogMsg {
        self.msg(Level::Error, Some(err), msg)
    }

    #[track_caller]
    fn fatal_msg(&self, msg: &str) -> LogMsg {
        self.msg(Level::Fatal, None, msg)
    }

    #[track_caller]
    fn panic_msg(&self, msg: &str) -> LogMsg {
        self.msg(Level::Panic, None, msg)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
