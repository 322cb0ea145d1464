use axum::{
    extract::{rejection::JsonRejection, rejection::PathRejection, Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use rw_agents::lifecycle::AgentLifecycle;
use rw_agents::OrchestratorError;
use rw_core::types::{Agent, NewAgent, TenantId};

use super::state::ApiState;
use super::tenant::Tenant;
use super::types::{AgentStatusResponse, RunView};
use crate::api_error::ApiError;

/// POST /agents -- register an agent in `configured` status.
///
/// # Response
/// * `201 Created` - the stored Agent
/// * `400 Bad Request` - missing name/provider/model or out-of-range config
pub(crate) async fn create_agent(
    State(state): State<Arc<ApiState>>,
    Tenant(tenant): Tenant,
    body: Result<Json<NewAgent>, JsonRejection>,
) -> Result<(StatusCode, Json<Agent>), ApiError> {
    let Json(new) = body?;
    let agent = state.engine.lifecycle.create_agent(tenant, new).await?;
    Ok((StatusCode::CREATED, Json(agent)))
}

/// GET /agents -- live agents of the caller's tenant, oldest first.
pub(crate) async fn list_agents(
    State(state): State<Arc<ApiState>>,
    Tenant(tenant): Tenant,
) -> Result<Json<Vec<Agent>>, ApiError> {
    Ok(Json(state.engine.lifecycle.list(tenant).await?))
}

/// GET /agents/{id}
pub(crate) async fn get_agent(
    State(state): State<Arc<ApiState>>,
    Tenant(tenant): Tenant,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Agent>, ApiError> {
    let Path(id) = path?;
    Ok(Json(state.engine.lifecycle.get(tenant, id).await?))
}

/// DELETE /agents/{id} -- `204`, or `409` while a run is active.
pub(crate) async fn delete_agent(
    State(state): State<Arc<ApiState>>,
    Tenant(tenant): Tenant,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let Path(id) = path?;
    state.engine.lifecycle.delete(tenant, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /agents/{id}/executions -- the agent's runs, newest first.
pub(crate) async fn list_agent_executions(
    State(state): State<Arc<ApiState>>,
    Tenant(tenant): Tenant,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Vec<RunView>>, ApiError> {
    let Path(id) = path?;
    let runs = state.engine.orchestrator.list_runs(tenant, id).await?;
    Ok(Json(runs.into_iter().map(RunView::from).collect()))
}

// ---------------------------------------------------------------------------
// Status operations
// ---------------------------------------------------------------------------

/// The lifecycle operations reachable as `POST /agents/{id}/{op}`.
#[derive(Debug, Clone, Copy)]
enum StatusOp {
    Launch,
    Pause,
    Resume,
    Recover,
    Reset,
    Terminate,
}

impl StatusOp {
    async fn apply(
        self,
        lifecycle: &AgentLifecycle,
        tenant: TenantId,
        id: Uuid,
    ) -> Result<Agent, OrchestratorError> {
        match self {
            StatusOp::Launch => lifecycle.launch(tenant, id).await,
            StatusOp::Pause => lifecycle.pause(tenant, id).await,
            StatusOp::Resume => lifecycle.resume(tenant, id).await,
            StatusOp::Recover => lifecycle.recover(tenant, id).await,
            StatusOp::Reset => lifecycle.reset(tenant, id).await,
            StatusOp::Terminate => lifecycle.terminate(tenant, id).await,
        }
    }
}

async fn status_op(
    state: &ApiState,
    tenant: TenantId,
    path: Result<Path<Uuid>, PathRejection>,
    op: StatusOp,
) -> Result<Json<AgentStatusResponse>, ApiError> {
    let Path(id) = path?;
    let agent = op.apply(&state.engine.lifecycle, tenant, id).await?;
    Ok(Json(AgentStatusResponse {
        id: agent.id,
        status: agent.status,
    }))
}

/// POST /agents/{id}/launch -- `configured|paused|terminated -> briefing`.
/// The agent becomes `ready` once briefing finishes.
pub(crate) async fn launch_agent(
    State(state): State<Arc<ApiState>>,
    Tenant(tenant): Tenant,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<AgentStatusResponse>, ApiError> {
    status_op(&state, tenant, path, StatusOp::Launch).await
}

/// POST /agents/{id}/pause
pub(crate) async fn pause_agent(
    State(state): State<Arc<ApiState>>,
    Tenant(tenant): Tenant,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<AgentStatusResponse>, ApiError> {
    status_op(&state, tenant, path, StatusOp::Pause).await
}

/// POST /agents/{id}/resume
pub(crate) async fn resume_agent(
    State(state): State<Arc<ApiState>>,
    Tenant(tenant): Tenant,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<AgentStatusResponse>, ApiError> {
    status_op(&state, tenant, path, StatusOp::Resume).await
}

/// POST /agents/{id}/recover
pub(crate) async fn recover_agent(
    State(state): State<Arc<ApiState>>,
    Tenant(tenant): Tenant,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<AgentStatusResponse>, ApiError> {
    status_op(&state, tenant, path, StatusOp::Recover).await
}

/// POST /agents/{id}/reset
pub(crate) async fn reset_agent(
    State(state): State<Arc<ApiState>>,
    Tenant(tenant): Tenant,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<AgentStatusResponse>, ApiError> {
    status_op(&state, tenant, path, StatusOp::Reset).await
}

/// POST /agents/{id}/terminate -- cancels the agent's active run, if any.
pub(crate) async fn terminate_agent(
    State(state): State<Arc<ApiState>>,
    Tenant(tenant): Tenant,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<AgentStatusResponse>, ApiError> {
    status_op(&state, tenant, path, StatusOp::Terminate).await
}
