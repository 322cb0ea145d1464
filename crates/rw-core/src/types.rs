use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Owning tenant of agents, runs, and cost records.
pub type TenantId = Uuid;

// ---------------------------------------------------------------------------
// AgentStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Configured,
    Briefing,
    Ready,
    Executing,
    Paused,
    Error,
    Terminated,
}

impl AgentStatus {
    pub const ALL: [AgentStatus; 7] = [
        AgentStatus::Configured,
        AgentStatus::Briefing,
        AgentStatus::Ready,
        AgentStatus::Executing,
        AgentStatus::Paused,
        AgentStatus::Error,
        AgentStatus::Terminated,
    ];
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AgentStatus::Configured => "configured",
            AgentStatus::Briefing => "briefing",
            AgentStatus::Ready => "ready",
            AgentStatus::Executing => "executing",
            AgentStatus::Paused => "paused",
            AgentStatus::Error => "error",
            AgentStatus::Terminated => "terminated",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// Agent configuration
// ---------------------------------------------------------------------------

/// How much context the briefing phase assembles before an agent is ready.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BriefingDepth {
    Minimal,
    #[default]
    Standard,
    Deep,
}

/// Retry behaviour for provider calls made on behalf of an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first retry; doubled on every subsequent attempt.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl RetryPolicy {
    const MAX_BACKOFF: Duration = Duration::from_secs(30);

    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff_ms: 0,
        }
    }

    /// Backoff before retry number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.backoff_ms.saturating_mul(factor)).min(Self::MAX_BACKOFF)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

fn default_max_retries() -> u32 {
    2
}
fn default_backoff_ms() -> u64 {
    500
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    /// Per-call provider timeout. `0` means "use the orchestrator default".
    #[serde(default)]
    pub timeout_secs: u64,
    /// Trailing-30-day spend cap in USD. `0.0` disables the check.
    #[serde(default)]
    pub budget_limit: f64,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub briefing_depth: BriefingDepth,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            timeout_secs: 0,
            budget_limit: 0.0,
            retry: RetryPolicy::default(),
            briefing_depth: BriefingDepth::default(),
        }
    }
}

fn default_temperature() -> f32 {
    0.7
}
fn default_max_output_tokens() -> u32 {
    1024
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub name: String,
    /// Registry name of the provider adapter (e.g. `"openai"`).
    pub provider: String,
    pub model: String,
    pub instructions: String,
    pub config: AgentConfig,
    pub status: AgentStatus,
    /// Context assembled by the last successful briefing.
    pub briefing: Option<String>,
    pub last_error: Option<String>,
    /// Optimistic concurrency version, bumped by every stored update.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Tombstone. Deleted agents stay referenced by their runs.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Agent {
    pub fn new(
        tenant_id: TenantId,
        name: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            name: name.into(),
            provider: provider.into(),
            model: model.into(),
            instructions: String::new(),
            config: AgentConfig::default(),
            status: AgentStatus::Configured,
            briefing: None,
            last_error: None,
            version: 0,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// The provider-call timeout, falling back to `default` when unset.
    pub fn timeout(&self, default: Duration) -> Duration {
        if self.config.timeout_secs == 0 {
            default
        } else {
            Duration::from_secs(self.config.timeout_secs)
        }
    }
}

/// Payload submitted to create an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAgent {
    pub name: String,
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub config: AgentConfig,
}

impl NewAgent {
    pub fn into_agent(self, tenant_id: TenantId) -> Agent {
        Agent::new(tenant_id, self.name, self.provider, self.model)
            .with_instructions(self.instructions)
            .with_config(self.config)
    }
}

// ---------------------------------------------------------------------------
// Token usage
// ---------------------------------------------------------------------------

/// Normalized (input, output, total) token triple.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Briefing,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            RunStatus::Pending | RunStatus::Briefing | RunStatus::Running
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunStatus::Pending => "pending",
            RunStatus::Briefing => "briefing",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", label)
    }
}

/// One execution attempt of an agent against a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub agent_id: Uuid,
    pub prompt: String,
    pub context: Option<String>,
    pub status: RunStatus,
    pub provider: String,
    pub model: String,
    pub output: Option<String>,
    pub finish_reason: Option<String>,
    pub usage: TokenUsage,
    pub cost: f64,
    /// Provider calls made, retries included.
    pub attempts: u32,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Run {
    pub fn new(agent: &Agent, prompt: impl Into<String>, context: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: agent.tenant_id,
            agent_id: agent.id,
            prompt: prompt.into(),
            context,
            status: RunStatus::Pending,
            provider: agent.provider.clone(),
            model: agent.model.clone(),
            output: None,
            finish_reason: None,
            usage: TokenUsage::default(),
            cost: 0.0,
            attempts: 0,
            error: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move into a terminal state, stamping `ended_at`.
    pub fn finish(&mut self, status: RunStatus) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.ended_at = Some(Utc::now());
    }
}

// ---------------------------------------------------------------------------
// CostRecord
// ---------------------------------------------------------------------------

/// Append-only ledger entry tying a run to its token usage and price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostRecord {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub agent_id: Uuid,
    pub run_id: Uuid,
    pub provider: String,
    pub model: String,
    pub usage: TokenUsage,
    pub cost: f64,
    pub created_at: DateTime<Utc>,
}

impl CostRecord {
    pub fn for_run(run: &Run, cost: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: run.tenant_id,
            agent_id: run.agent_id,
            run_id: run.id,
            provider: run.provider.clone(),
            model: run.model.clone(),
            usage: run.usage,
            cost,
            created_at: Utc::now(),
        }
    }
}
