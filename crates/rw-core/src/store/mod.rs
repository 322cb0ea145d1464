//! Persistence seams for agents, runs, and the cost ledger.
//!
//! Every read is scoped by tenant. A record owned by another tenant is
//! indistinguishable from a missing one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::types::{Agent, CostRecord, Run, TenantId};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Optimistic concurrency check failed: someone else updated the agent.
    #[error("agent {id} version conflict: expected {expected}, found {found}")]
    Conflict { id: Uuid, expected: u64, found: u64 },
    #[error("record {0} not found")]
    NotFound(Uuid),
    /// Terminal runs are immutable.
    #[error("run {0} is already finished")]
    RunFinalized(Uuid),
    #[error("storage backend: {0}")]
    Backend(String),
}

impl From<tokio_rusqlite::Error> for StoreError {
    fn from(e: tokio_rusqlite::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait AgentStore: Send + Sync {
    async fn insert_agent(&self, agent: &Agent) -> Result<(), StoreError>;

    /// Fetch an agent, tombstoned ones included.
    async fn get_agent(&self, tenant: TenantId, id: Uuid) -> Result<Option<Agent>, StoreError>;

    /// Live (non-deleted) agents of a tenant, oldest first.
    async fn list_agents(&self, tenant: TenantId) -> Result<Vec<Agent>, StoreError>;

    /// Persist `agent` if its `version` still matches the stored one.
    /// Returns the stored copy with the bumped version and `updated_at`.
    async fn update_agent(&self, agent: &Agent) -> Result<Agent, StoreError>;
}

#[async_trait]
pub trait RunStore: Send + Sync {
    async fn insert_run(&self, run: &Run) -> Result<(), StoreError>;

    async fn get_run(&self, tenant: TenantId, id: Uuid) -> Result<Option<Run>, StoreError>;

    /// Overwrite a run. Refused with [`StoreError::RunFinalized`] once the
    /// stored copy has reached a terminal status.
    async fn update_run(&self, run: &Run) -> Result<(), StoreError>;

    /// Runs of one agent, newest first.
    async fn list_runs_for_agent(
        &self,
        tenant: TenantId,
        agent_id: Uuid,
    ) -> Result<Vec<Run>, StoreError>;

    /// The agent's non-terminal run, if any.
    async fn active_run_for_agent(
        &self,
        tenant: TenantId,
        agent_id: Uuid,
    ) -> Result<Option<Run>, StoreError>;
}

#[async_trait]
pub trait CostLedger: Send + Sync {
    async fn record_cost(&self, record: &CostRecord) -> Result<(), StoreError>;

    /// Total spend of an agent since `since` (inclusive).
    async fn sum_costs_since(
        &self,
        tenant: TenantId,
        agent_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<f64, StoreError>;

    async fn list_costs(
        &self,
        tenant: TenantId,
        agent_id: Uuid,
    ) -> Result<Vec<CostRecord>, StoreError>;
}

/// Everything the engine persists.
pub trait Repository: AgentStore + RunStore + CostLedger {}

impl<T: AgentStore + RunStore + CostLedger> Repository for T {}
