use crate::attrs::AttrKind;
use crate::catalog::MetricKind;

/// Problems found while cleaning attribute definitions or applying values.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AttrError {
    #[error("attr #{index} has an empty name")]
    EmptyName { index: usize },
    #[error("attr #{index} ({name}) has the same name as #{first}")]
    Duplicate {
        index: usize,
        first: usize,
        name: String,
    },
    #[error("attr #{index} ({name}) has invalid type '{attr_type}'")]
    InvalidType {
        index: usize,
        name: String,
        attr_type: String,
    },
    #[error("attribute {0} is not defined")]
    NotFound(String),
    #[error("attribute {name} is {expected}, got {got}")]
    KindMismatch {
        name: String,
        expected: AttrKind,
        got: AttrKind,
    },
}

/// Metric definition, lookup and emission failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MetricError {
    #[error("metric #{index} has an empty name")]
    EmptyName { index: usize },
    #[error("metric #{index} ({name}) has the same name as #{first}")]
    Duplicate {
        index: usize,
        first: usize,
        name: String,
    },
    #[error("metric #{index} ({name}): {source}")]
    Attribute {
        index: usize,
        name: String,
        source: AttrError,
    },
    #[error("metric {0} not found")]
    NotFound(String),
    #[error("metric {name} has wrong kind {kind}")]
    WrongKind { name: String, kind: MetricKind },
    #[error("metric {name}: monotonic counter cannot add {value}")]
    NegativeDelta { name: String, value: f64 },
    #[error("metric {0}: value is not finite")]
    NonFinite(String),
    #[error("metric {name}: kind {kind} not supported by this backend")]
    Unsupported { name: String, kind: MetricKind },
    #[error("metric {name}: {message}")]
    Backend { name: String, message: String },
}

/// Failures constructing a backend from its configuration.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("{backend}: missing {field}")]
    Missing {
        backend: &'static str,
        field: &'static str,
    },
    #[error("{backend}: {source}")]
    Io {
        backend: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("{backend}: {message}")]
    Init {
        backend: &'static str,
        message: String,
    },
}

impl BackendError {
    pub(crate) fn init(backend: &'static str, message: impl ToString) -> Self {
        Self::Init {
            backend,
            message: message.to_string(),
        }
    }
}
