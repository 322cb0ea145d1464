use rw_core::store::StoreError;
use rw_core::types::{AgentStatus, RunStatus};
use rw_providers::{ProviderError, RegistryError};
use uuid::Uuid;

use crate::pool::PoolError;
use crate::state_machine::TransitionError;

/// Failures reported synchronously by lifecycle and orchestrator
/// operations. In-flight provider failures are recorded on the run instead.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    #[error("{0} not found")]
    NotFound(String),

    #[error("agent {id} is not ready (status: {status})")]
    AgentNotReady { id: Uuid, status: AgentStatus },

    #[error("agent {agent_id} already has an active run {run_id}")]
    RunInProgress { agent_id: Uuid, run_id: Uuid },

    #[error("budget exceeded: spent {spent:.4} of {limit:.4} in the current window")]
    BudgetExceeded { spent: f64, limit: f64 },

    #[error("budget check unavailable: {0}")]
    BudgetUnavailable(String),

    #[error("provider not found: `{0}`")]
    ProviderNotFound(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("run {id} cannot be cancelled (status: {status})")]
    NotCancellable { id: Uuid, status: RunStatus },

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl OrchestratorError {
    pub fn agent_not_found(id: Uuid) -> Self {
        OrchestratorError::NotFound(format!("agent {id}"))
    }

    pub fn run_not_found(id: Uuid) -> Self {
        OrchestratorError::NotFound(format!("run {id}"))
    }

    /// Stable machine-readable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestratorError::InvalidTransition(_) => "invalid_transition",
            OrchestratorError::NotFound(_) => "not_found",
            OrchestratorError::AgentNotReady { .. } | OrchestratorError::RunInProgress { .. } => {
                "agent_not_ready"
            }
            OrchestratorError::BudgetExceeded { .. } => "budget_exceeded",
            OrchestratorError::BudgetUnavailable(_) => "budget_unavailable",
            OrchestratorError::ProviderNotFound(_) => "provider_not_found",
            OrchestratorError::Provider(e) if e.is_timeout() => "timeout",
            OrchestratorError::Provider(_) => "provider_error",
            OrchestratorError::NotCancellable { .. } => "not_cancellable",
            OrchestratorError::BadRequest(_) => "bad_request",
            OrchestratorError::Store(StoreError::NotFound(_)) => "not_found",
            OrchestratorError::Pool(_) | OrchestratorError::Store(_) => "internal",
        }
    }
}

impl From<RegistryError> for OrchestratorError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::ProviderNotFound(name) => OrchestratorError::ProviderNotFound(name),
            other @ RegistryError::MissingCredential(_) => {
                OrchestratorError::BadRequest(other.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        let id = Uuid::new_v4();
        assert_eq!(OrchestratorError::agent_not_found(id).kind(), "not_found");
        assert_eq!(
            OrchestratorError::AgentNotReady { id, status: AgentStatus::Paused }.kind(),
            "agent_not_ready"
        );
        assert_eq!(
            OrchestratorError::from(ProviderError::timeout("x", std::time::Duration::from_secs(1)))
                .kind(),
            "timeout"
        );
        assert_eq!(
            OrchestratorError::from(ProviderError::http("x", 500, "boom")).kind(),
            "provider_error"
        );
        assert_eq!(
            OrchestratorError::from(RegistryError::ProviderNotFound("x".into())).kind(),
            "provider_not_found"
        );
    }

    #[test]
    fn not_ready_message_names_status() {
        let err = OrchestratorError::AgentNotReady {
            id: Uuid::nil(),
            status: AgentStatus::Briefing,
        };
        assert!(err.to_string().contains("briefing"));
    }
}
