//! Shared state behind the lifecycle service and the orchestrator.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use rw_core::config::OrchestratorConfig;
use rw_core::store::{Repository, StoreError};
use rw_core::types::{Agent, AgentStatus, Run, RunStatus, TenantId};
use rw_providers::ProviderRegistry;
use rw_telemetry::metrics::{global_metrics, RUNS_ACTIVE, RUNS_FINISHED_TOTAL};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::briefing::{BriefingLoader, StaticBriefingLoader};
use crate::error::OrchestratorError;
use crate::events::{EngineEvent, EventBus};
use crate::lifecycle::AgentLifecycle;
use crate::locks::AgentLocks;
use crate::orchestrator::ExecutionOrchestrator;
use crate::pool::WorkerPool;
use crate::state_machine;

pub struct EngineContext {
    pub store: Arc<dyn Repository>,
    pub registry: Arc<ProviderRegistry>,
    pub locks: AgentLocks,
    pub pool: WorkerPool,
    pub events: EventBus,
    pub settings: OrchestratorConfig,
    /// Cancellation tokens of runs whose background task has not finished.
    pub(crate) run_tokens: DashMap<Uuid, CancellationToken>,
}

impl EngineContext {
    pub fn new(
        store: Arc<dyn Repository>,
        registry: Arc<ProviderRegistry>,
        settings: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            registry,
            locks: AgentLocks::new(),
            pool: WorkerPool::new(settings.max_concurrent_runs),
            events: EventBus::new(),
            settings,
            run_tokens: DashMap::new(),
        }
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.default_timeout_secs)
    }

    /// A live agent of `tenant`. Tombstoned agents count as missing.
    pub async fn load_agent(&self, tenant: TenantId, id: Uuid) -> Result<Agent, OrchestratorError> {
        match self.store.get_agent(tenant, id).await? {
            Some(agent) if !agent.is_deleted() => Ok(agent),
            _ => Err(OrchestratorError::agent_not_found(id)),
        }
    }

    pub async fn load_run(&self, tenant: TenantId, id: Uuid) -> Result<Run, OrchestratorError> {
        self.store
            .get_run(tenant, id)
            .await?
            .ok_or_else(|| OrchestratorError::run_not_found(id))
    }

    /// Validate `agent.status -> to` and persist it.
    pub(crate) async fn transition_agent(
        &self,
        agent: Agent,
        to: AgentStatus,
    ) -> Result<Agent, OrchestratorError> {
        let next = state_machine::transition(agent.status, to)?;
        self.store_status(agent, next).await
    }

    /// Persist `agent` with status `to` and announce the change. Callers
    /// have already validated the move.
    pub(crate) async fn store_status(
        &self,
        mut agent: Agent,
        to: AgentStatus,
    ) -> Result<Agent, OrchestratorError> {
        let from = agent.status;
        agent.status = to;
        let stored = self.store.update_agent(&agent).await?;
        if from != to {
            debug!(agent_id = %stored.id, from = %from, to = %to, "agent status transition");
            self.events.publish(EngineEvent::AgentStatusChanged {
                tenant_id: stored.tenant_id,
                agent_id: stored.id,
                from,
                to,
                at: Utc::now(),
            });
        }
        Ok(stored)
    }

    /// Move an executing agent to `to` after its run ended. Agents that
    /// left `Executing` meanwhile (paused, terminated) keep their status.
    pub(crate) async fn settle_agent(
        &self,
        tenant: TenantId,
        agent_id: Uuid,
        to: AgentStatus,
        last_error: Option<String>,
    ) {
        let agent = match self.store.get_agent(tenant, agent_id).await {
            Ok(Some(a)) => a,
            Ok(None) => return,
            Err(e) => {
                warn!(agent_id = %agent_id, error = %e, "failed to load agent after run");
                return;
            }
        };
        if agent.status != AgentStatus::Executing {
            debug!(agent_id = %agent_id, status = %agent.status, "agent left executing, status kept");
            return;
        }
        let mut agent = agent;
        if last_error.is_some() {
            agent.last_error = last_error;
        }
        if let Err(e) = self.transition_agent(agent, to).await {
            warn!(agent_id = %agent_id, to = %to, error = %e, "agent status update after run failed");
        }
    }

    /// Bookkeeping once a run has been stored in a terminal status.
    pub(crate) fn run_finished(&self, run: &Run) {
        self.run_tokens.remove(&run.id);
        let metrics = global_metrics();
        let status = run.status.to_string();
        metrics.increment_counter(RUNS_FINISHED_TOTAL, &[("status", status.as_str())]);
        metrics.add_gauge(RUNS_ACTIVE, -1);
        info!(
            run_id = %run.id,
            agent_id = %run.agent_id,
            status = %run.status,
            cost = run.cost,
            "run finished"
        );
        self.events.publish(EngineEvent::RunFinished {
            tenant_id: run.tenant_id,
            agent_id: run.agent_id,
            run_id: run.id,
            status: run.status,
            cost: run.cost,
            error: run.error.clone(),
            at: run.ended_at.unwrap_or_else(Utc::now),
        });
    }

    /// Cancel `run` while holding its agent's lock: signal the background
    /// task, store `Cancelled`, and return an executing agent to `Ready`.
    pub(crate) async fn cancel_locked(&self, mut run: Run) -> Result<Run, OrchestratorError> {
        if !run.status.is_cancellable() {
            return Err(OrchestratorError::NotCancellable {
                id: run.id,
                status: run.status,
            });
        }
        let previous = run.status;
        run.finish(RunStatus::Cancelled);
        match self.store.update_run(&run).await {
            Ok(()) => {}
            Err(StoreError::RunFinalized(_)) => {
                let current = self.load_run(run.tenant_id, run.id).await?;
                return Err(OrchestratorError::NotCancellable {
                    id: run.id,
                    status: current.status,
                });
            }
            Err(e) => return Err(e.into()),
        }
        if let Some((_, token)) = self.run_tokens.remove(&run.id) {
            token.cancel();
        }
        info!(run_id = %run.id, from = %previous, "run cancelled");
        self.run_finished(&run);
        self.settle_agent(run.tenant_id, run.agent_id, AgentStatus::Ready, None)
            .await;
        Ok(run)
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The lifecycle service and the orchestrator over one shared context.
pub struct Engine {
    pub context: Arc<EngineContext>,
    pub lifecycle: Arc<AgentLifecycle>,
    pub orchestrator: Arc<ExecutionOrchestrator>,
}

impl Engine {
    pub fn new(
        store: Arc<dyn Repository>,
        registry: Arc<ProviderRegistry>,
        settings: OrchestratorConfig,
    ) -> Self {
        let delay = Duration::from_millis(settings.briefing_delay_ms);
        let loader: Arc<dyn BriefingLoader> =
            Arc::new(StaticBriefingLoader::new(Arc::clone(&store), delay));
        Self::with_loader(store, registry, settings, loader)
    }

    pub fn with_loader(
        store: Arc<dyn Repository>,
        registry: Arc<ProviderRegistry>,
        settings: OrchestratorConfig,
        loader: Arc<dyn BriefingLoader>,
    ) -> Self {
        let context = Arc::new(EngineContext::new(store, registry, settings));
        Self {
            lifecycle: Arc::new(AgentLifecycle::new(Arc::clone(&context), loader)),
            orchestrator: Arc::new(ExecutionOrchestrator::new(Arc::clone(&context))),
            context,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.context.events
    }

    /// Stop the worker pool, waiting up to `shutdown_grace_secs`.
    pub async fn shutdown(&self) -> bool {
        let grace = Duration::from_secs(self.context.settings.shutdown_grace_secs);
        self.context.pool.shutdown(grace).await
    }
}
