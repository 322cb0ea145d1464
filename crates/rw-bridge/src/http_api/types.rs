use chrono::{DateTime, Utc};
use rw_core::types::{AgentStatus, Run, RunStatus, TokenUsage};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Executions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct CreateExecutionRequest {
    pub agent_id: Uuid,
    pub prompt: String,
    #[serde(default)]
    pub context: Option<String>,
}

/// `201` body of `POST /executions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionCreated {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
}

impl From<&Run> for ExecutionCreated {
    fn from(run: &Run) -> Self {
        Self {
            id: run.id,
            agent_id: run.agent_id,
            status: run.status,
            started_at: run.started_at,
        }
    }
}

/// A run as exposed over HTTP. The completion text is `result`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunView {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub status: RunStatus,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub provider: String,
    pub model: String,
    pub result: Option<String>,
    pub finish_reason: Option<String>,
    pub tokens_used: TokenUsage,
    pub cost: f64,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl From<Run> for RunView {
    fn from(run: Run) -> Self {
        Self {
            id: run.id,
            agent_id: run.agent_id,
            status: run.status,
            prompt: run.prompt,
            context: run.context,
            provider: run.provider,
            model: run.model,
            result: run.output,
            finish_reason: run.finish_reason,
            tokens_used: run.usage,
            cost: run.cost,
            attempts: run.attempts,
            error: run.error,
            started_at: run.started_at,
            ended_at: run.ended_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

// ---------------------------------------------------------------------------
// Agents
// ---------------------------------------------------------------------------

/// `200` body of the agent status operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatusResponse {
    pub id: Uuid,
    pub status: AgentStatus,
}

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ValidateKeyRequest {
    pub api_key: String,
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateKeyResponse {
    pub valid: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub providers: usize,
    pub pending_tasks: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rw_core::types::Agent;

    #[test]
    fn run_view_renames_output_and_usage() {
        let agent = Agent::new(Uuid::new_v4(), "a", "mock", "mock-model");
        let mut run = Run::new(&agent, "go", None);
        run.output = Some("done".into());
        run.usage = TokenUsage::new(3, 4);

        let json = serde_json::to_value(RunView::from(run)).unwrap();
        assert_eq!(json["result"], "done");
        assert_eq!(json["tokens_used"]["total_tokens"], 7);
        assert!(json.get("error").is_none());
        assert!(json.get("context").is_none());
    }
}
