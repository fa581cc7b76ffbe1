//! Unified logs, metrics and traces behind one handle.
//!
//! An [`Insighter`] bundles a [`Logger`](logs::Logger), a
//! [`Meter`](metrics::Meter) and a [`Tracer`](traces::Tracer) for one unit
//! of work, usually a request. Attributes set on it are routed to the
//! signals their definitions name.
//!
//! Key components:
//! - **Attributes and catalog**: declared, typed attributes and a validated
//!   catalog of metric definitions
//! - **Logs**: JSON lines (optionally mirrored to Graylog over GELF), Sentry
//! - **Metrics**: Prometheus registry with an HTTP endpoint, DogStatsD, OTLP
//! - **Traces**: OpenTelemetry spans exported over OTLP
//! - **Lifecycle**: [`create_insights`] builds everything from an
//!   [`InsightsConfig`]; the returned [`Flusher`] drains buffers at shutdown
//! - **Middleware**: per-request Insighter for axum services
//!
//! ```no_run
//! use insights_core::prelude::*;
//! use insights_core::{create_insights, InsightsConfig};
//!
//! let insights = create_insights(&InsightsConfig::default(), &[]).unwrap();
//! let ins = insights.insighter();
//! ins.str("app", "billing");
//! ins.l().info("started");
//! ins.m().inc("http.server.request.count");
//! insights.shutdown();
//! ```

pub mod attrs;
pub mod builder;
pub mod catalog;
pub mod config;
pub mod context;
pub mod defaults;
pub mod error;
pub mod flush;
pub mod insighter;
pub mod logging;
pub mod logs;
pub mod metrics;
pub mod middleware;
pub mod traces;

pub use attrs::{AttrKind, AttrMap, AttrValue, AttributeDefinition, AttributeSet};
pub use builder::{create_insights, metric_definitions, Insights};
pub use catalog::{MetricCatalog, MetricDefinition, MetricKind};
pub use config::{ConfigError, InsightsConfig};
pub use error::{AttrError, BackendError, MetricError};
pub use flush::{FlushReport, Flusher};
pub use insighter::{Insighter, InsighterBuilder};
pub use middleware::insights_middleware;

/// Traits needed to call methods on the signal handles.
pub mod prelude {
    pub use crate::attrs::Attributable;
    pub use crate::logs::Logger;
    pub use crate::metrics::Meter;
    pub use crate::traces::{Span, Tracer};
}
