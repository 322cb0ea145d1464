// ---------------------------------------------------------------------------
// HTTP API module directory
// ---------------------------------------------------------------------------
//
// One sub-module per resource. This file owns the Axum router and the
// middleware stack.

mod agents;
mod executions;
mod misc;
mod providers;
pub mod state;
pub mod tenant;
pub mod types;

pub use state::ApiState;
pub use tenant::{Tenant, TENANT_HEADER};
pub use types::*;

pub use self::router::api_router;

// ---------------------------------------------------------------------------
// Router + middleware
// ---------------------------------------------------------------------------

mod router {
    use super::*;
    use axum::{
        http::{HeaderName, Method, Uri},
        middleware as axum_middleware,
        routing::{get, post},
        Router,
    };
    use std::sync::Arc;
    use tower_http::cors::{AllowOrigin, CorsLayer};

    use rw_agents::OrchestratorError;
    use rw_telemetry::middleware::metrics_middleware;
    use rw_telemetry::tracing_setup::{request_id_middleware, REQUEST_ID_HEADER};

    use crate::api_error::ApiError;

    async fn no_route(uri: Uri) -> ApiError {
        OrchestratorError::NotFound(format!("route {}", uri.path())).into()
    }

    fn local_origin(origin: &axum::http::HeaderValue) -> bool {
        origin.to_str().is_ok_and(|o| {
            ["http://localhost", "http://127.0.0.1", "https://localhost", "https://127.0.0.1"]
                .iter()
                .any(|prefix| o.starts_with(prefix))
        })
    }

    /// Build the full API router.
    pub fn api_router(state: Arc<ApiState>) -> Router {
        Router::new()
            // Executions
            .route("/executions", post(executions::create_execution))
            .route("/executions/{id}", get(executions::get_execution))
            .route("/executions/{id}/cancel", post(executions::cancel_execution))
            // Agents
            .route("/agents", get(agents::list_agents).post(agents::create_agent))
            .route(
                "/agents/{id}",
                get(agents::get_agent).delete(agents::delete_agent),
            )
            .route("/agents/{id}/launch", post(agents::launch_agent))
            .route("/agents/{id}/pause", post(agents::pause_agent))
            .route("/agents/{id}/resume", post(agents::resume_agent))
            .route("/agents/{id}/recover", post(agents::recover_agent))
            .route("/agents/{id}/reset", post(agents::reset_agent))
            .route("/agents/{id}/terminate", post(agents::terminate_agent))
            .route(
                "/agents/{id}/executions",
                get(agents::list_agent_executions),
            )
            // Providers
            .route("/providers", get(providers::list_providers))
            .route("/providers/{name}/models", get(providers::list_models))
            .route("/providers/{name}/validate", post(providers::validate_key))
            // Operations
            .route("/health", get(misc::health))
            .route("/metrics", get(misc::metrics))
            .fallback(no_route)
            .layer(axum_middleware::from_fn(metrics_middleware))
            .layer(axum_middleware::from_fn(request_id_middleware))
            .layer(
                CorsLayer::new()
                    .allow_origin(AllowOrigin::predicate(|origin, _parts| local_origin(origin)))
                    .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
                    .allow_headers([
                        axum::http::header::CONTENT_TYPE,
                        HeaderName::from_static(TENANT_HEADER),
                        HeaderName::from_static(REQUEST_ID_HEADER),
                    ]),
            )
            .with_state(state)
    }
}
