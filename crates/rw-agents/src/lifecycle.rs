use std::sync::Arc;

use chrono::Utc;
use rw_core::types::{Agent, AgentStatus, NewAgent, TenantId};
use tracing::{info, warn};
use uuid::Uuid;

use crate::briefing::{BriefingError, BriefingLoader};
use crate::engine::EngineContext;
use crate::error::OrchestratorError;
use crate::state_machine::{self, TransitionError};

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Agent CRUD and status operations. Each mutation runs under the
/// agent's lock.
pub struct AgentLifecycle {
    ctx: Arc<EngineContext>,
    loader: Arc<dyn BriefingLoader>,
}

fn validate(new: &NewAgent) -> Result<()> {
    let bad = |msg: &str| Err(OrchestratorError::BadRequest(msg.to_string()));
    if new.name.trim().is_empty() {
        return bad("name must not be empty");
    }
    if new.provider.trim().is_empty() {
        return bad("provider must not be empty");
    }
    if new.model.trim().is_empty() {
        return bad("model must not be empty");
    }
    let c = &new.config;
    if !(0.0..=2.0).contains(&c.temperature) {
        return bad("temperature must be between 0 and 2");
    }
    if c.max_output_tokens == 0 {
        return bad("max_output_tokens must be positive");
    }
    if !c.budget_limit.is_finite() || c.budget_limit < 0.0 {
        return bad("budget_limit must be a non-negative number");
    }
    Ok(())
}

impl AgentLifecycle {
    pub fn new(ctx: Arc<EngineContext>, loader: Arc<dyn BriefingLoader>) -> Self {
        Self { ctx, loader }
    }

    pub async fn create_agent(&self, tenant: TenantId, new: NewAgent) -> Result<Agent> {
        validate(&new)?;
        let agent = new.into_agent(tenant);
        self.ctx.store.insert_agent(&agent).await?;
        info!(agent_id = %agent.id, tenant_id = %tenant, provider = %agent.provider, "agent created");
        Ok(agent)
    }

    pub async fn get(&self, tenant: TenantId, id: Uuid) -> Result<Agent> {
        self.ctx.load_agent(tenant, id).await
    }

    pub async fn list(&self, tenant: TenantId) -> Result<Vec<Agent>> {
        Ok(self.ctx.store.list_agents(tenant).await?)
    }

    // -- Launch --

    /// Enter `Briefing` and load context on the worker pool. The agent
    /// becomes `Ready` (or `Error`) when the loader finishes.
    pub async fn launch(&self, tenant: TenantId, id: Uuid) -> Result<Agent> {
        let _guard = self.ctx.locks.lock(id).await;
        let mut agent = self.ctx.load_agent(tenant, id).await?;
        let next = state_machine::launch(agent.status)?;
        agent.last_error = None;
        let agent = self.ctx.store_status(agent, next).await?;

        let task = Self::brief(
            Arc::clone(&self.ctx),
            Arc::clone(&self.loader),
            agent.clone(),
        );
        if let Err(e) = self.ctx.pool.submit(task) {
            let mut failed = agent;
            failed.last_error = Some(e.to_string());
            if let Err(te) = self.ctx.transition_agent(failed, AgentStatus::Error).await {
                warn!(agent_id = %id, error = %te, "agent status update after refused launch failed");
            }
            return Err(e.into());
        }
        Ok(agent)
    }

    async fn brief(ctx: Arc<EngineContext>, loader: Arc<dyn BriefingLoader>, launched: Agent) {
        let token = ctx.pool.child_token();
        let outcome = tokio::select! {
            _ = token.cancelled() => Err(BriefingError("interrupted by shutdown".into())),
            r = loader.load(&launched) => r,
        };

        let _guard = ctx.locks.lock(launched.id).await;
        let current = match ctx.store.get_agent(launched.tenant_id, launched.id).await {
            Ok(Some(a)) if !a.is_deleted() => a,
            Ok(_) => return,
            Err(e) => {
                warn!(agent_id = %launched.id, error = %e, "failed to reload agent after briefing");
                return;
            }
        };
        // Any write since launch (terminate, relaunch) supersedes this briefing.
        if current.version != launched.version || current.status != AgentStatus::Briefing {
            info!(
                agent_id = %launched.id,
                status = %current.status,
                "agent changed during briefing, result dropped"
            );
            return;
        }

        let mut agent = current;
        let to = match outcome {
            Ok(context) => {
                agent.briefing = Some(context);
                AgentStatus::Ready
            }
            Err(e) => {
                warn!(agent_id = %agent.id, error = %e, "briefing failed");
                agent.last_error = Some(e.to_string());
                AgentStatus::Error
            }
        };
        if let Err(e) = ctx.transition_agent(agent, to).await {
            warn!(agent_id = %launched.id, error = %e, "failed to store briefing outcome");
        }
    }

    // -- Simple transitions --

    /// Move from one of `sources` to `to`, validated by the state machine.
    async fn step(
        &self,
        tenant: TenantId,
        id: Uuid,
        sources: &[AgentStatus],
        to: AgentStatus,
        edit: impl FnOnce(&mut Agent),
    ) -> Result<Agent> {
        let _guard = self.ctx.locks.lock(id).await;
        let mut agent = self.ctx.load_agent(tenant, id).await?;
        if !sources.contains(&agent.status) {
            return Err(TransitionError {
                from: agent.status,
                to,
            }
            .into());
        }
        edit(&mut agent);
        self.ctx.transition_agent(agent, to).await
    }

    /// `Ready | Executing -> Paused`. A run in flight keeps going.
    pub async fn pause(&self, tenant: TenantId, id: Uuid) -> Result<Agent> {
        use AgentStatus::*;
        self.step(tenant, id, &[Ready, Executing], Paused, |_| {}).await
    }

    /// `Paused -> Ready`.
    pub async fn resume(&self, tenant: TenantId, id: Uuid) -> Result<Agent> {
        use AgentStatus::*;
        self.step(tenant, id, &[Paused], Ready, |_| {}).await
    }

    /// `Error -> Ready`, keeping the previous briefing.
    pub async fn recover(&self, tenant: TenantId, id: Uuid) -> Result<Agent> {
        use AgentStatus::*;
        self.step(tenant, id, &[Error], Ready, |a| a.last_error = None)
            .await
    }

    /// `Error -> Configured`, clearing briefing and error.
    pub async fn reset(&self, tenant: TenantId, id: Uuid) -> Result<Agent> {
        use AgentStatus::*;
        self.step(tenant, id, &[Error], Configured, |a| {
            a.briefing = None;
            a.last_error = None;
        })
        .await
    }

    // -- Terminate / delete --

    /// Terminate from any status, cancelling the agent's active run. A
    /// terminated agent is returned unchanged.
    pub async fn terminate(&self, tenant: TenantId, id: Uuid) -> Result<Agent> {
        let _guard = self.ctx.locks.lock(id).await;
        let agent = self.ctx.load_agent(tenant, id).await?;
        let Some(to) = state_machine::terminate(agent.status) else {
            return Ok(agent);
        };

        if let Some(run) = self.ctx.store.active_run_for_agent(tenant, id).await? {
            match self.ctx.cancel_locked(run).await {
                Ok(_) | Err(OrchestratorError::NotCancellable { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        let agent = self.ctx.load_agent(tenant, id).await?;
        let agent = self.ctx.store_status(agent, to).await?;
        info!(agent_id = %id, "agent terminated");
        Ok(agent)
    }

    /// Tombstone the agent. Refused while it has an active run.
    pub async fn delete(&self, tenant: TenantId, id: Uuid) -> Result<()> {
        {
            let _guard = self.ctx.locks.lock(id).await;
            let mut agent = self.ctx.load_agent(tenant, id).await?;
            if let Some(run) = self.ctx.store.active_run_for_agent(tenant, id).await? {
                return Err(OrchestratorError::RunInProgress {
                    agent_id: id,
                    run_id: run.id,
                });
            }
            agent.deleted_at = Some(Utc::now());
            self.ctx.store.update_agent(&agent).await?;
            info!(agent_id = %id, "agent deleted");
        }
        self.ctx.locks.forget(id);
        Ok(())
    }
}
