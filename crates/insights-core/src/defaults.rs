//! Well-known attribute names and the default HTTP metric definitions.

use crate::attrs::{AttrKind, AttributeDefinition};
use crate::catalog::{MetricDefinition, MetricKind};

// ---------------------------------------------------------------------------
// Attribute names
// ---------------------------------------------------------------------------

pub const ATTR_APP: &str = "app";

pub const ATTR_HTTP_METHOD: &str = "http.request.method";
pub const ATTR_HTTP_ROUTE: &str = "http.route";
pub const ATTR_HTTP_STATUS: &str = "http.response.status_code";
/// `2xx`, `3xx`, `4xx` or `5xx`, to keep label cardinality low.
pub const ATTR_HTTP_STATUS_GROUP: &str = "http.response.status_group";
pub const ATTR_HTTP_REQUEST_ID: &str = "http.request.id";

// Logs and traces only.
pub const ATTR_HTTP_PATH: &str = "http.request.path";
pub const ATTR_HTTP_QUERY: &str = "http.request.query";
pub const ATTR_HTTP_REMOTE_IP: &str = "http.request.remote_ip";
pub const ATTR_HTTP_DURATION: &str = "http.request.duration";
pub const ATTR_HTTP_RESPONSE_SIZE: &str = "http.response.size";

// ---------------------------------------------------------------------------
// Metric names
// ---------------------------------------------------------------------------

pub const MET_HTTP_SERVER_REQUEST_COUNT: &str = "http.server.request.count";
pub const MET_HTTP_SERVER_REQUEST_DURATION: &str = "http.server.request.duration";
pub const MET_HTTP_SERVER_REQUEST_BODY_SIZE: &str = "http.server.request.body.size";
pub const MET_HTTP_SERVER_RESPONSE_BODY_SIZE: &str = "http.server.response.body.size";

/// Dimensions shared by every HTTP server metric.
pub fn http_metric_attributes() -> Vec<AttributeDefinition> {
    vec![
        AttributeDefinition::str(ATTR_HTTP_METHOD),
        AttributeDefinition::str(ATTR_HTTP_ROUTE),
        AttributeDefinition::new(ATTR_HTTP_STATUS, AttrKind::I64),
        AttributeDefinition::str(ATTR_HTTP_STATUS_GROUP),
    ]
}

/// Attributes an HTTP service can set through its insighter.
pub fn http_attribute_definitions() -> Vec<AttributeDefinition> {
    let mut defs = http_metric_attributes();
    defs.extend([
        AttributeDefinition::str(ATTR_APP),
        AttributeDefinition::str(ATTR_HTTP_REQUEST_ID).routed(true, false, true),
        AttributeDefinition::str(ATTR_HTTP_PATH).routed(true, false, true),
        AttributeDefinition::str(ATTR_HTTP_QUERY).routed(true, false, true),
        AttributeDefinition::str(ATTR_HTTP_REMOTE_IP).routed(true, false, true),
        AttributeDefinition::new(ATTR_HTTP_DURATION, AttrKind::F64).routed(true, false, true),
        AttributeDefinition::new(ATTR_HTTP_RESPONSE_SIZE, AttrKind::I64).routed(true, false, true),
    ]);
    defs
}

pub fn http_metric_definitions() -> Vec<MetricDefinition> {
    let attrs = http_metric_attributes();
    vec![
        MetricDefinition::new(MET_HTTP_SERVER_REQUEST_COUNT, MetricKind::MonotonicCounter)
            .with_description("Number of HTTP requests served")
            .with_attributes(attrs.clone()),
        MetricDefinition::new(MET_HTTP_SERVER_REQUEST_DURATION, MetricKind::Histogram)
            .with_units("s")
            .with_description("Duration of HTTP requests")
            .with_attributes(attrs.clone())
            .with_buckets(vec![
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ]),
        MetricDefinition::new(MET_HTTP_SERVER_REQUEST_BODY_SIZE, MetricKind::Histogram)
            .with_units("By")
            .with_description("Size of HTTP request bodies")
            .with_attributes(attrs.clone()),
        MetricDefinition::new(MET_HTTP_SERVER_RESPONSE_BODY_SIZE, MetricKind::Histogram)
            .with_units("By")
            .with_description("Size of HTTP response bodies")
            .with_attributes(attrs),
    ]
}

/// `404` becomes `4xx`.
pub fn status_group(status: u16) -> String {
    format!("{}xx", status / 100)
}
