use axum::{
    extract::{MatchedPath, Request, State},
    http::{header::CONTENT_LENGTH, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use opentelemetry::propagation::{Extractor, TextMapPropagator};
use opentelemetry::trace::FutureExt;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::attrs::Attributable;
use crate::context;
use crate::defaults::{
    status_group, ATTR_HTTP_DURATION, ATTR_HTTP_METHOD, ATTR_HTTP_PATH, ATTR_HTTP_QUERY,
    ATTR_HTTP_REQUEST_ID, ATTR_HTTP_RESPONSE_SIZE, ATTR_HTTP_ROUTE, ATTR_HTTP_STATUS,
    ATTR_HTTP_STATUS_GROUP, MET_HTTP_SERVER_REQUEST_BODY_SIZE, MET_HTTP_SERVER_REQUEST_COUNT,
    MET_HTTP_SERVER_REQUEST_DURATION, MET_HTTP_SERVER_RESPONSE_BODY_SIZE,
};
use crate::insighter::{Insighter, InsighterBuilder};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Axum middleware giving every request its own [`Insighter`].
///
/// Install with `from_fn_with_state(builder, insights_middleware)` through
/// `route_layer`, so the matched route template is known. The Insighter is
/// available to handlers as `Extension<Arc<Insighter>>` and through
/// [`context::current`].
///
/// For each request it records:
/// - `http.server.request.count` and `http.server.request.duration` (seconds)
/// - request and response body sizes when `Content-Length` is known
/// - one `request` log line and one span
///
/// The request id is taken from `X-Request-Id` or generated, and echoed on
/// the response.
///
/// The request span continues an incoming W3C `traceparent`. Its context is
/// attached while the handler runs, so spans started with
/// [`Tracer::start_child`](crate::traces::Tracer::start_child) become its
/// children; it is also inserted as an `Extension<Context>`.
pub async fn insights_middleware(
    State(builder): State<InsighterBuilder>,
    mut request: Request,
    next: Next,
) -> Response {
    let ins = builder.build();
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_default();
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().as_simple().to_string());

    ins.str(ATTR_HTTP_METHOD, &method);
    ins.str(ATTR_HTTP_ROUTE, &route);
    ins.str(ATTR_HTTP_REQUEST_ID, &request_id);
    ins.str(ATTR_HTTP_PATH, request.uri().path());
    if let Some(query) = request.uri().query() {
        ins.str(ATTR_HTTP_QUERY, query);
    }
    let request_size = content_length(request.headers());

    let span_name = if route.is_empty() {
        method.clone()
    } else {
        format!("{method} {route}")
    };
    let parent = TraceContextPropagator::new().extract(&HeaderExtractor(request.headers()));
    let span = ins.t().start(&parent, &span_name, None);
    let span_cx = span.context();

    let ins = Arc::new(ins);
    request.extensions_mut().insert(ins.clone());
    request.extensions_mut().insert(span_cx.clone());

    let started = Instant::now();
    let mut response = context::scope(ins.clone(), next.run(request).with_context(span_cx)).await;
    let elapsed = started.elapsed().as_secs_f64();

    let status = response.status().as_u16();
    ins.i64(ATTR_HTTP_STATUS, i64::from(status));
    ins.str(ATTR_HTTP_STATUS_GROUP, &status_group(status));
    ins.f64(ATTR_HTTP_DURATION, elapsed);

    let m = ins.m();
    m.inc(MET_HTTP_SERVER_REQUEST_COUNT);
    m.rec(MET_HTTP_SERVER_REQUEST_DURATION, elapsed);
    if let Some(size) = request_size {
        m.rec(MET_HTTP_SERVER_REQUEST_BODY_SIZE, size as f64);
    }
    if let Some(size) = content_length(response.headers()) {
        m.rec(MET_HTTP_SERVER_RESPONSE_BODY_SIZE, size as f64);
        ins.i64(ATTR_HTTP_RESPONSE_SIZE, i64::try_from(size).unwrap_or(i64::MAX));
    }

    span.i64(ATTR_HTTP_STATUS, i64::from(status));
    span.end();
    ins.l().info_msg("request").send();

    if let Ok(val) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, val);
    }
    response
}

struct HeaderExtractor<'a>(&'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|k| k.as_str()).collect()
    }
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs::AttrValue;
    use crate::catalog::MetricCatalog;
    use crate::defaults::{http_attribute_definitions, http_metric_definitions};
    use crate::logs::NopLogger;
    use crate::metrics::{MetricOp, MockMeter, MockRecorder};
    use crate::traces::{Context, NopTracer, OtelTracer, Tracer, TracerBuilder};
    use axum::{body::Body, middleware::from_fn_with_state, routing::get, Extension, Router};
    use opentelemetry::trace::TraceContextExt;
    use opentelemetry_sdk::trace::TracerProvider;
    use tower::ServiceExt;

    const TRACEPARENT: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

    fn traced_app() -> Router {
        let origin = Arc::new(OtelTracer::from_provider(TracerProvider::builder().build(), "test"));
        let tracer: TracerBuilder = Arc::new(move || origin.clone_tracer());
        let (builder, _) = InsighterBuilder::new(
            &http_attribute_definitions(),
            NopLogger::builder(),
            MockMeter::builder(MockRecorder::new(), None),
            tracer,
        );
        Router::new()
            .route(
                "/child",
                get(
                    |Extension(ins): Extension<Arc<Insighter>>, Extension(cx): Extension<Context>| async move {
                        let child = ins.t().start_child("db.query");
                        let ids = format!(
                            "{} {}",
                            cx.span().span_context().trace_id(),
                            child.trace_id()
                        );
                        child.end();
                        ids
                    },
                ),
            )
            .route_layer(from_fn_with_state(builder, insights_middleware))
    }

    async fn body_text(response: Response) -> String {
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    fn app(recorder: &MockRecorder) -> Router {
        let (catalog, _) = MetricCatalog::build(&http_metric_definitions());
        let (builder, _) = InsighterBuilder::new(
            &http_attribute_definitions(),
            NopLogger::builder(),
            MockMeter::builder(recorder.clone(), Some(Arc::new(catalog))),
            NopTracer::builder(),
        );
        Router::new()
            .route(
                "/users/{id}",
                get(|Extension(ins): Extension<Arc<Insighter>>| async move {
                    ins.m().labels()[ATTR_HTTP_ROUTE].to_string()
                }),
            )
            .route(
                "/ctx",
                get(|| async { context::current().m().labels().len().to_string() }),
            )
            .route_layer(from_fn_with_state(builder, insights_middleware))
    }

    #[tokio::test]
    async fn test_records_count_with_matched_route() {
        let recorder = MockRecorder::new();
        let response = app(&recorder)
            .oneshot(Request::builder().uri("/users/42").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));

        let counts = recorder.for_key(MET_HTTP_SERVER_REQUEST_COUNT);
        assert_eq!(counts.len(), 1);
        assert_eq!(counts[0].op, MetricOp::Add(1.0));
        let labels = &counts[0].labels;
        assert_eq!(labels[ATTR_HTTP_ROUTE], AttrValue::from("/users/{id}"));
        assert_eq!(labels[ATTR_HTTP_METHOD], AttrValue::from("GET"));
        assert_eq!(labels[ATTR_HTTP_STATUS], AttrValue::from("200"));
        assert_eq!(labels[ATTR_HTTP_STATUS_GROUP], AttrValue::from("2xx"));
        assert_eq!(recorder.for_key(MET_HTTP_SERVER_REQUEST_DURATION).len(), 1);
    }

    #[tokio::test]
    async fn test_request_id_echoed() {
        let recorder = MockRecorder::new();
        let response = app(&recorder)
            .oneshot(
                Request::builder()
                    .uri("/users/1")
                    .header(REQUEST_ID_HEADER, "abc-123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers()[REQUEST_ID_HEADER], "abc-123");
    }

    #[tokio::test]
    async fn test_handler_sees_scoped_insighter() {
        let recorder = MockRecorder::new();
        let response = app(&recorder)
            .oneshot(Request::builder().uri("/ctx").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        // method and route are already set when the handler runs
        assert_eq!(&body[..], b"2");
    }

    #[tokio::test]
    async fn test_handler_span_is_child_of_request_span() {
        let response = traced_app()
            .oneshot(Request::builder().uri("/child").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let text = body_text(response).await;
        let (request_trace, child_trace) = text.split_once(' ').unwrap();
        assert_eq!(request_trace.len(), 32);
        assert_ne!(request_trace, "00000000000000000000000000000000");
        assert_eq!(child_trace, request_trace);
    }

    #[tokio::test]
    async fn test_incoming_traceparent_is_continued() {
        let response = traced_app()
            .oneshot(
                Request::builder()
                    .uri("/child")
                    .header("traceparent", TRACEPARENT)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let text = body_text(response).await;
        assert_eq!(
            text,
            "4bf92f3577b34da6a3ce929d0e0e4736 4bf92f3577b34da6a3ce929d0e0e4736"
        );
    }
}
