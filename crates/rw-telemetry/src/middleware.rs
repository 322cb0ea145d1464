use axum::{
    body::Body,
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use std::time::Instant;

use crate::metrics::{global_metrics, API_REQUESTS_TOTAL, API_REQUEST_DURATION_SECONDS};

/// Records `api_requests_total{method,route,status}` and the request
/// duration histogram.
///
/// The route label is the matched route template (`/agents/{id}`), never the
/// raw path, so ids do not explode series cardinality.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let start = Instant::now();

    let response = next.run(request).await;

    let status = response.status().as_u16().to_string();
    let m = global_metrics();
    m.increment_counter(
        API_REQUESTS_TOTAL,
        &[("method", &method), ("route", &route), ("status", &status)],
    );
    m.record_histogram(API_REQUEST_DURATION_SECONDS, start.elapsed().as_secs_f64());

    response
}
