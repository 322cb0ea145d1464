use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rw_core::store::StoreError;
use rw_core::text::truncate_utf8;
use rw_core::types::{Agent, AgentStatus, CostRecord, RetryPolicy, Run, RunStatus, TenantId};
use rw_providers::tokens::estimate_messages;
use rw_providers::{
    CompletionRequest, CompletionResponse, Message, ProviderAdapter, ProviderError, ProviderKind,
};
use rw_telemetry::metrics::{
    global_metrics, PROVIDER_CALLS_TOTAL, PROVIDER_CALL_DURATION_SECONDS, RUNS_ACTIVE,
    RUNS_CREATED_TOTAL,
};
use rw_telemetry::tracing_setup::run_span;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use crate::budget::BudgetGuard;
use crate::engine::EngineContext;
use crate::error::OrchestratorError;
use crate::pool::PoolError;

/// Longest error message stored on a run.
pub const MAX_ERROR_CHARS: usize = 1000;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

// ---------------------------------------------------------------------------
// Tenant credentials
// ---------------------------------------------------------------------------

/// A decrypted per-tenant credential, handed over just in time.
#[derive(Clone)]
pub struct TenantCredential {
    pub api_key: String,
    pub base_url: Option<String>,
}

impl std::fmt::Debug for TenantCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantCredential")
            .field("api_key", &"[redacted]")
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Source of tenant-supplied provider keys. Without one, or when it has no
/// key for a tenant, the registry's shared adapter is used.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn credential(&self, tenant: TenantId, provider: &str) -> Option<TenantCredential>;
}

// ---------------------------------------------------------------------------
// ExecutionOrchestrator
// ---------------------------------------------------------------------------

/// Creates runs, dispatches them to the worker pool, and owns every run
/// state change.
///
/// Cancellation drops the in-flight provider future. The backend may still
/// finish (and bill) the request; nothing it returns is recorded.
pub struct ExecutionOrchestrator {
    ctx: Arc<EngineContext>,
    budget: BudgetGuard,
    credentials: Option<Arc<dyn CredentialSource>>,
}

impl ExecutionOrchestrator {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        let budget = BudgetGuard::new(
            ctx.settings.budget_mode,
            ctx.settings.budget_window_days,
        );
        Self {
            ctx,
            budget,
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, source: Arc<dyn CredentialSource>) -> Self {
        self.credentials = Some(source);
        self
    }

    /// Validate, persist a `Pending` run, flip the agent to `Executing`, and
    /// hand the run to the worker pool. Returns as soon as the run is stored.
    pub async fn create_run(
        &self,
        tenant: TenantId,
        agent_id: Uuid,
        prompt: impl Into<String>,
        context: Option<String>,
    ) -> Result<Run> {
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            return Err(OrchestratorError::BadRequest("prompt must not be empty".into()));
        }

        let ctx = &self.ctx;
        let _guard = ctx.locks.lock(agent_id).await;

        let agent = ctx.load_agent(tenant, agent_id).await?;
        if agent.status != AgentStatus::Ready {
            return Err(OrchestratorError::AgentNotReady {
                id: agent.id,
                status: agent.status,
            });
        }
        if let Some(active) = ctx.store.active_run_for_agent(tenant, agent_id).await? {
            return Err(OrchestratorError::RunInProgress {
                agent_id,
                run_id: active.id,
            });
        }
        self.budget.check(ctx.store.as_ref(), &agent).await?;
        let adapter = self.resolve_adapter(&agent).await?;
        if ctx.pool.is_shutting_down() {
            return Err(PoolError::ShuttingDown.into());
        }

        let run = Run::new(&agent, prompt, context);
        ctx.store.insert_run(&run).await?;
        let metrics = global_metrics();
        metrics.increment_counter(RUNS_CREATED_TOTAL, &[("provider", run.provider.as_str())]);
        metrics.add_gauge(RUNS_ACTIVE, 1);
        info!(run_id = %run.id, agent_id = %agent_id, provider = %run.provider, model = %run.model, "run created");

        let timeout = agent.timeout(ctx.default_timeout());
        let retry = agent.config.retry.clone();
        let agent = match ctx.transition_agent(agent.clone(), AgentStatus::Executing).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(agent_id = %agent_id, error = %e, "agent did not enter executing; run continues");
                agent
            }
        };

        let token = ctx.pool.child_token();
        ctx.run_tokens.insert(run.id, token.clone());
        let job = RunJob {
            ctx: Arc::clone(ctx),
            adapter,
            agent,
            run: run.clone(),
            token,
            timeout,
            retry,
        };
        let span = run_span(run.id, agent_id);
        if let Err(e) = ctx.pool.submit(job.execute().instrument(span)) {
            let mut failed = run;
            failed.error = Some(e.to_string());
            failed.finish(RunStatus::Failed);
            if ctx.store.update_run(&failed).await.is_ok() {
                ctx.run_finished(&failed);
            }
            ctx.settle_agent(tenant, agent_id, AgentStatus::Error, Some(e.to_string()))
                .await;
            return Err(e.into());
        }
        Ok(run)
    }

    /// Tenant keys only apply to the built-in backends; anything else
    /// registered under its own name uses the shared adapter.
    async fn resolve_adapter(&self, agent: &Agent) -> Result<Arc<dyn ProviderAdapter>> {
        let built_in = ProviderKind::from_name(&agent.provider).is_some();
        if let Some(source) = self.credentials.as_ref().filter(|_| built_in) {
            if let Some(cred) = source.credential(agent.tenant_id, &agent.provider).await {
                debug!(agent_id = %agent.id, provider = %agent.provider, "using tenant credential");
                return Ok(self.ctx.registry.create_provider_with_key(
                    &agent.provider,
                    &cred.api_key,
                    cred.base_url.as_deref(),
                )?);
            }
        }
        Ok(self.ctx.registry.get(&agent.provider)?)
    }

    /// Cancel a `Pending`, `Briefing`, or `Running` run. The agent goes back
    /// to `Ready` if it was executing it.
    pub async fn cancel(&self, tenant: TenantId, run_id: Uuid) -> Result<Run> {
        let run = self.ctx.load_run(tenant, run_id).await?;
        let _guard = self.ctx.locks.lock(run.agent_id).await;
        let run = self.ctx.load_run(tenant, run_id).await?;
        self.ctx.cancel_locked(run).await
    }

    pub async fn get(&self, tenant: TenantId, run_id: Uuid) -> Result<Run> {
        self.ctx.load_run(tenant, run_id).await
    }

    /// Runs of a live agent, newest first.
    pub async fn list_runs(&self, tenant: TenantId, agent_id: Uuid) -> Result<Vec<Run>> {
        self.ctx.load_agent(tenant, agent_id).await?;
        Ok(self.ctx.store.list_runs_for_agent(tenant, agent_id).await?)
    }
}

// ---------------------------------------------------------------------------
// Background execution
// ---------------------------------------------------------------------------

enum Outcome {
    Completed(CompletionResponse),
    Failed(ProviderError),
    Cancelled,
}

struct RunJob {
    ctx: Arc<EngineContext>,
    adapter: Arc<dyn ProviderAdapter>,
    agent: Agent,
    run: Run,
    token: CancellationToken,
    timeout: Duration,
    retry: RetryPolicy,
}

/// Instructions and briefing become the system message; request context
/// precedes the task in the user message.
pub fn build_request(agent: &Agent, run: &Run, timeout: Duration) -> CompletionRequest {
    let mut messages = Vec::with_capacity(2);
    let system: Vec<&str> = [Some(agent.instructions.as_str()), agent.briefing.as_deref()]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if !system.is_empty() {
        messages.push(Message::system(system.join("\n\n")));
    }
    let user = match run.context.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        Some(context) => format!("{context}\n\n{}", run.prompt),
        None => run.prompt.clone(),
    };
    messages.push(Message::user(user));

    CompletionRequest::new(&agent.model, messages)
        .with_temperature(agent.config.temperature)
        .with_max_tokens(agent.config.max_output_tokens)
        .with_timeout(timeout)
}

impl RunJob {
    async fn execute(mut self) {
        if self.token.is_cancelled() {
            self.interrupted().await;
            return;
        }

        if !self.advance(RunStatus::Briefing).await {
            return;
        }
        let request = build_request(&self.agent, &self.run, self.timeout);
        debug!(estimated_input_tokens = estimate_messages(&request.messages), "prompt assembled");

        if self.token.is_cancelled() {
            self.interrupted().await;
            return;
        }
        if !self.advance(RunStatus::Running).await {
            return;
        }

        let outcome = self.call_provider(&request).await;
        self.finalize(outcome).await;
    }

    /// Store an intermediate status. `false` when the run was already
    /// finalized elsewhere (cancelled) or the store failed.
    async fn advance(&mut self, status: RunStatus) -> bool {
        let stored = {
            let _guard = self.ctx.locks.lock(self.run.agent_id).await;
            self.run.status = status;
            self.ctx.store.update_run(&self.run).await
        };
        match stored {
            Ok(()) => true,
            Err(StoreError::RunFinalized(_)) => {
                debug!(status = %status, "run finalized before it could advance");
                false
            }
            Err(e) => {
                warn!(error = %e, "failed to store run status");
                self.fail(format!("storage error: {e}")).await;
                false
            }
        }
    }

    async fn call_provider(&mut self, request: &CompletionRequest) -> Outcome {
        let provider = self.adapter.name().to_string();
        let mut attempt: u32 = 0;
        loop {
            if self.token.is_cancelled() {
                return Outcome::Cancelled;
            }
            attempt += 1;
            self.run.attempts = attempt;

            let started = Instant::now();
            let call = tokio::time::timeout(self.timeout, self.adapter.complete(request));
            let result = tokio::select! {
                _ = self.token.cancelled() => return Outcome::Cancelled,
                r = call => r.unwrap_or_else(|_| Err(ProviderError::timeout(&provider, self.timeout))),
            };
            let metrics = global_metrics();
            metrics.record_histogram(PROVIDER_CALL_DURATION_SECONDS, started.elapsed().as_secs_f64());
            let outcome = match &result {
                Ok(_) => "ok",
                Err(e) if e.is_timeout() => "timeout",
                Err(_) => "error",
            };
            metrics.increment_counter(
                PROVIDER_CALLS_TOTAL,
                &[("provider", provider.as_str()), ("outcome", outcome)],
            );

            match result {
                Ok(response) => return Outcome::Completed(response),
                Err(e) if e.is_retryable() && attempt <= self.retry.max_retries => {
                    let backoff = self.retry.backoff_for(attempt);
                    warn!(attempt, backoff_ms = backoff.as_millis() as u64, error = %e, "provider call failed, retrying");
                    tokio::select! {
                        _ = self.token.cancelled() => return Outcome::Cancelled,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                Err(e) => return Outcome::Failed(e),
            }
        }
    }

    async fn finalize(mut self, outcome: Outcome) {
        match outcome {
            Outcome::Completed(response) => self.complete(response).await,
            Outcome::Failed(e) => self.fail(e.to_string()).await,
            Outcome::Cancelled => self.interrupted().await,
        }
    }

    async fn complete(&mut self, response: CompletionResponse) {
        let _guard = self.ctx.locks.lock(self.run.agent_id).await;
        let cost = self
            .ctx
            .registry
            .pricing()
            .calculate(&self.run.model, &response.usage);
        self.run.output = Some(response.message.content);
        self.run.finish_reason = Some(response.finish_reason);
        self.run.usage = response.usage;
        self.run.cost = cost;
        self.run.finish(RunStatus::Completed);

        if !self.store_terminal().await {
            return;
        }
        if let Err(e) = self.ctx.store.record_cost(&CostRecord::for_run(&self.run, cost)).await {
            warn!(error = %e, "failed to record cost");
        }
        self.ctx.run_finished(&self.run);
        self.ctx
            .settle_agent(self.run.tenant_id, self.run.agent_id, AgentStatus::Ready, None)
            .await;
    }

    /// Record `Failed` with a bounded message and move the agent to `Error`.
    async fn fail(&mut self, message: String) {
        let message = truncate_chars(&message, MAX_ERROR_CHARS);
        warn!(error = %message, "run failed");
        let _guard = self.ctx.locks.lock(self.run.agent_id).await;
        self.run.error = Some(message.clone());
        self.run.finish(RunStatus::Failed);
        if !self.store_terminal().await {
            return;
        }
        self.ctx.run_finished(&self.run);
        self.ctx
            .settle_agent(
                self.run.tenant_id,
                self.run.agent_id,
                AgentStatus::Error,
                Some(message),
            )
            .await;
    }

    /// The token fired. A user cancel has already stored `Cancelled`; a
    /// shutdown leaves the run to be failed here.
    async fn interrupted(&mut self) {
        if self.ctx.pool.is_shutting_down() {
            let _guard = self.ctx.locks.lock(self.run.agent_id).await;
            self.run.error = Some("interrupted by shutdown".into());
            self.run.finish(RunStatus::Failed);
            if self.store_terminal().await {
                self.ctx.run_finished(&self.run);
                self.ctx
                    .settle_agent(
                        self.run.tenant_id,
                        self.run.agent_id,
                        AgentStatus::Error,
                        Some("interrupted by shutdown".into()),
                    )
                    .await;
            }
        } else {
            debug!("run cancelled, result discarded");
        }
    }

    /// `false` when the run was finalized by someone else first.
    async fn store_terminal(&self) -> bool {
        match self.ctx.store.update_run(&self.run).await {
            Ok(()) => true,
            Err(StoreError::RunFinalized(_)) => {
                info!(status = %self.run.status, "run already finalized, result discarded");
                false
            }
            Err(e) => {
                warn!(error = %e, "failed to store finished run");
                self.ctx.run_tokens.remove(&self.run.id);
                false
            }
        }
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => truncate_utf8(s, idx),
        None => s.to_string(),
    }
}
