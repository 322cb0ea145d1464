//! HTTP API error types.
//!
//! Every failure leaves the API as `{"error": <message>, "kind": <kind>}`
//! where `kind` is one of a fixed set of machine-readable strings. The HTTP
//! status is derived from the kind.

use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rw_agents::OrchestratorError;
use rw_providers::RegistryError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ApiError {
    /// A lifecycle or orchestrator failure; carries its own kind.
    #[error(transparent)]
    Engine(#[from] OrchestratorError),

    /// Malformed body, path, or header.
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Internal(String),
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        ApiError::Engine(e.into())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(e: PathRejection) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

impl ApiError {
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Engine(e) => e.kind(),
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        status_for_kind(self.kind())
    }
}

/// HTTP status for an error kind.
pub fn status_for_kind(kind: &str) -> StatusCode {
    match kind {
        "not_found" => StatusCode::NOT_FOUND,
        "agent_not_ready" | "budget_exceeded" => StatusCode::CONFLICT,
        "invalid_transition" | "not_cancellable" | "provider_not_found" | "model_unknown"
        | "bad_request" => StatusCode::BAD_REQUEST,
        "budget_unavailable" => StatusCode::SERVICE_UNAVAILABLE,
        "provider_error" => StatusCode::BAD_GATEWAY,
        "timeout" => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ---------------------------------------------------------------------------
// IntoResponse implementation
// ---------------------------------------------------------------------------

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let status = status_for_kind(kind);
        if status.is_server_error() {
            error!(kind, error = %self, "request failed");
        }
        let body = Json(json!({
            "error": self.to_string(),
            "kind": kind,
        }));
        (status, body).into_response()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
