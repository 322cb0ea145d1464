use axum::{
    extract::{rejection::JsonRejection, rejection::PathRejection, Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use super::state::ApiState;
use super::tenant::Tenant;
use super::types::{CreateExecutionRequest, ExecutionCreated, MessageResponse, RunView};
use crate::api_error::ApiError;

/// POST /executions -- start a run of a ready agent.
///
/// Returns as soon as the run is stored as `pending`; execution continues in
/// the background. Poll `GET /executions/{id}` for the outcome.
///
/// # Response
/// * `201 Created` - `{id, agent_id, status, started_at}`
/// * `400 Bad Request` - invalid body, empty prompt, or unknown provider
/// * `404 Not Found` - agent missing or owned by another tenant
/// * `409 Conflict` - agent not ready, already running, or over budget
pub(crate) async fn create_execution(
    State(state): State<Arc<ApiState>>,
    Tenant(tenant): Tenant,
    body: Result<Json<CreateExecutionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ExecutionCreated>), ApiError> {
    let Json(req) = body?;
    let run = state
        .engine
        .orchestrator
        .create_run(tenant, req.agent_id, req.prompt, req.context)
        .await?;
    Ok((StatusCode::CREATED, Json(ExecutionCreated::from(&run))))
}

/// GET /executions/{id}
pub(crate) async fn get_execution(
    State(state): State<Arc<ApiState>>,
    Tenant(tenant): Tenant,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<RunView>, ApiError> {
    let Path(id) = path?;
    let run = state.engine.orchestrator.get(tenant, id).await?;
    Ok(Json(run.into()))
}

/// POST /executions/{id}/cancel -- cancel a pending, briefing, or running run.
///
/// * `200 OK` - `{message}`
/// * `400 Bad Request` - the run already finished (`not_cancellable`)
pub(crate) async fn cancel_execution(
    State(state): State<Arc<ApiState>>,
    Tenant(tenant): Tenant,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Path(id) = path?;
    let run = state.engine.orchestrator.cancel(tenant, id).await?;
    Ok(Json(MessageResponse {
        message: format!("execution {} cancelled", run.id),
    }))
}
