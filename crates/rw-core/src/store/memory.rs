use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{AgentStore, CostLedger, RunStore, StoreError};
use crate::types::{Agent, CostRecord, Run, TenantId};

/// Process-local store. Default backend and the one tests use.
#[derive(Default)]
pub struct MemoryStore {
    agents: RwLock<HashMap<Uuid, Agent>>,
    runs: RwLock<HashMap<Uuid, Run>>,
    costs: RwLock<Vec<CostRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AgentStore for MemoryStore {
    async fn insert_agent(&self, agent: &Agent) -> Result<(), StoreError> {
        self.agents.write().await.insert(agent.id, agent.clone());
        Ok(())
    }

    async fn get_agent(&self, tenant: TenantId, id: Uuid) -> Result<Option<Agent>, StoreError> {
        Ok(self
            .agents
            .read()
            .await
            .get(&id)
            .filter(|a| a.tenant_id == tenant)
            .cloned())
    }

    async fn list_agents(&self, tenant: TenantId) -> Result<Vec<Agent>, StoreError> {
        let mut out: Vec<Agent> = self
            .agents
            .read()
            .await
            .values()
            .filter(|a| a.tenant_id == tenant && !a.is_deleted())
            .cloned()
            .collect();
        out.sort_by_key(|a| a.created_at);
        Ok(out)
    }

    async fn update_agent(&self, agent: &Agent) -> Result<Agent, StoreError> {
        let mut agents = self.agents.write().await;
        let stored = agents
            .get_mut(&agent.id)
            .filter(|a| a.tenant_id == agent.tenant_id)
            .ok_or(StoreError::NotFound(agent.id))?;
        if stored.version != agent.version {
            return Err(StoreError::Conflict {
                id: agent.id,
                expected: agent.version,
                found: stored.version,
            });
        }
        let mut next = agent.clone();
        next.version += 1;
        next.updated_at = Utc::now();
        *stored = next.clone();
        Ok(next)
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn insert_run(&self, run: &Run) -> Result<(), StoreError> {
        self.runs.write().await.insert(run.id, run.clone());
        Ok(())
    }

    async fn get_run(&self, tenant: TenantId, id: Uuid) -> Result<Option<Run>, StoreError> {
        Ok(self
            .runs
            .read()
            .await
            .get(&id)
            .filter(|r| r.tenant_id == tenant)
            .cloned())
    }

    async fn update_run(&self, run: &Run) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        let stored = runs
            .get_mut(&run.id)
            .filter(|r| r.tenant_id == run.tenant_id)
            .ok_or(StoreError::NotFound(run.id))?;
        if stored.is_terminal() {
            return Err(StoreError::RunFinalized(run.id));
        }
        *stored = run.clone();
        Ok(())
    }

    async fn list_runs_for_agent(
        &self,
        tenant: TenantId,
        agent_id: Uuid,
    ) -> Result<Vec<Run>, StoreError> {
        let mut out: Vec<Run> = self
            .runs
            .read()
            .await
            .values()
            .filter(|r| r.tenant_id == tenant && r.agent_id == agent_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(out)
    }

    async fn active_run_for_agent(
        &self,
        tenant: TenantId,
        agent_id: Uuid,
    ) -> Result<Option<Run>, StoreError> {
        Ok(self
            .runs
            .read()
            .await
            .values()
            .find(|r| r.tenant_id == tenant && r.agent_id == agent_id && !r.is_terminal())
            .cloned())
    }
}

#[async_trait]
impl CostLedger for MemoryStore {
    async fn record_cost(&self, record: &CostRecord) -> Result<(), StoreError> {
        self.costs.write().await.push(record.clone());
        Ok(())
    }

    async fn sum_costs_since(
        &self,
        tenant: TenantId,
        agent_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<f64, StoreError> {
        Ok(self
            .costs
            .read()
            .await
            .iter()
            .filter(|c| c.tenant_id == tenant && c.agent_id == agent_id && c.created_at >= since)
            .map(|c| c.cost)
            .sum())
    }

    async fn list_costs(
        &self,
        tenant: TenantId,
        agent_id: Uuid,
    ) -> Result<Vec<CostRecord>, StoreError> {
        Ok(self
            .costs
            .read()
            .await
            .iter()
            .filter(|c| c.tenant_id == tenant && c.agent_id == agent_id)
            .cloned()
            .collect())
    }
}
