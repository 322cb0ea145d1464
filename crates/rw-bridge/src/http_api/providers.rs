use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use std::sync::Arc;
use tracing::info;

use rw_agents::OrchestratorError;
use rw_providers::types::ModelInfo;

use super::state::ApiState;
use super::types::{ValidateKeyRequest, ValidateKeyResponse};
use crate::api_error::ApiError;

/// GET /providers -- registered provider names, sorted.
pub(crate) async fn list_providers(State(state): State<Arc<ApiState>>) -> Json<Vec<String>> {
    let mut names = state.registry().list();
    names.sort();
    Json(names)
}

/// GET /providers/{name}/models -- models the backend currently offers,
/// falling back to the adapter's static catalog where the backend has no
/// listing.
pub(crate) async fn list_models(
    State(state): State<Arc<ApiState>>,
    Path(name): Path<String>,
) -> Result<Json<Vec<ModelInfo>>, ApiError> {
    let adapter = state.registry().get(&name)?;
    let models = adapter.models().await.map_err(OrchestratorError::from)?;
    Ok(Json(models))
}

/// POST /providers/{name}/validate -- check a caller-supplied key with one
/// authenticated round trip. The key is used for this request only.
///
/// * `200 OK` - `{valid: true}`
/// * `400 Bad Request` - unknown provider or the backend rejected the key
pub(crate) async fn validate_key(
    State(state): State<Arc<ApiState>>,
    Path(name): Path<String>,
    body: Result<Json<ValidateKeyRequest>, JsonRejection>,
) -> Result<Json<ValidateKeyResponse>, ApiError> {
    let Json(req) = body?;
    let adapter =
        state
            .registry()
            .create_provider_with_key(&name, &req.api_key, req.base_url.as_deref())?;
    match adapter.validate_key(&req.api_key).await {
        Ok(()) => {
            info!(provider = %name, "credential validated");
            Ok(Json(ValidateKeyResponse { valid: true }))
        }
        Err(e) => {
            info!(provider = %name, error = %e, "credential rejected");
            Err(ApiError::BadRequest(format!("credential rejected: {e}")))
        }
    }
}
