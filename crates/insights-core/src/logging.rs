//! Diagnostics of the telemetry layer itself.
//!
//! Definition warnings, swallowed metric errors and backend fallbacks are
//! reported through `tracing`. These helpers install a subscriber for them;
//! applications that already install one can skip this.

use std::str::FromStr;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiagFormat {
    #[default]
    Human,
    Json,
}

impl FromStr for DiagFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "human" | "text" | "pretty" => Ok(Self::Human),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown diagnostics format '{other}'")),
        }
    }
}

/// Install a global fmt subscriber.
///
/// `RUST_LOG` wins over `default_level` (e.g. "info" or
/// "insights_core=debug,warn"). Returns false when a subscriber was already
/// installed, in which case nothing changes.
pub fn init(service_name: &str, default_level: &str, format: DiagFormat) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let installed = match format {
        DiagFormat::Human => fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .try_init()
            .is_ok(),
        DiagFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .try_init()
            .is_ok(),
    };
    if installed {
        tracing::debug!(service = service_name, ?format, "diagnostics initialised");
    }
    installed
}

/// Human-readable diagnostics on stdout. Repeated calls are no-ops.
pub fn init_logging(service_name: &str, default_level: &str) {
    init(service_name, default_level, DiagFormat::Human);
}

/// JSON diagnostics on stdout. Repeated calls are no-ops.
pub fn init_logging_json(service_name: &str, default_level: &str) {
    init(service_name, default_level, DiagFormat::Json);
}
