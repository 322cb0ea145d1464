use axum::{extract::State, response::IntoResponse, Json};
use std::sync::Arc;

use rw_telemetry::metrics::global_metrics;

use super::state::ApiState;
use super::types::HealthResponse;

/// GET /health -- liveness plus a few counters.
pub(crate) async fn health(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    let ctx = &state.engine.context;
    let status = if ctx.pool.is_shutting_down() {
        "shutting_down"
    } else {
        "ok"
    };
    Json(HealthResponse {
        status: status.into(),
        version: env!("CARGO_PKG_VERSION").into(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        providers: ctx.registry.len(),
        pending_tasks: ctx.pool.active(),
    })
}

/// GET /metrics -- exports telemetry metrics in Prometheus text format.
pub(crate) async fn metrics() -> impl IntoResponse {
    let body = global_metrics().export_prometheus();
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        body,
    )
}
