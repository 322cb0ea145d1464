//! Run creation, execution, cancellation, and budget enforcement against
//! the in-memory store and a mock provider.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rw_agents::{
    CredentialSource, Engine, EngineEvent, ExecutionOrchestrator, OrchestratorError,
    TenantCredential,
};
use rw_core::config::OrchestratorConfig;
use rw_core::store::{AgentStore, CostLedger, MemoryStore, RunStore};
use rw_core::types::{
    Agent, AgentConfig, AgentStatus, CostRecord, NewAgent, RetryPolicy, Run, RunStatus,
    TenantId,
};
use rw_providers::mock::MockAdapter;
use rw_providers::{ProviderAdapter, ProviderError, ProviderRegistry};
use uuid::Uuid;

// ===========================================================================
// Harness
// ===========================================================================

struct Harness {
    engine: Engine,
    store: Arc<MemoryStore>,
    mock: Arc<MockAdapter>,
    tenant: TenantId,
}

fn settings() -> OrchestratorConfig {
    OrchestratorConfig {
        briefing_delay_ms: 0,
        shutdown_grace_secs: 2,
        ..OrchestratorConfig::default()
    }
}

fn harness(mock: MockAdapter) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let registry = Arc::new(ProviderRegistry::new());
    let mock = Arc::new(mock);
    registry.register(Arc::clone(&mock) as Arc<dyn ProviderAdapter>);
    let engine = Engine::new(store.clone(), registry, settings());
    Harness {
        engine,
        store,
        mock,
        tenant: Uuid::new_v4(),
    }
}

fn quick_config() -> AgentConfig {
    AgentConfig {
        retry: RetryPolicy::none(),
        ..AgentConfig::default()
    }
}

fn new_agent(provider: &str, config: AgentConfig) -> NewAgent {
    NewAgent {
        name: "summarizer".into(),
        provider: provider.into(),
        model: "mock-model".into(),
        instructions: "Summarize the input.".into(),
        config,
    }
}

async fn wait_for_agent(h: &Harness, id: Uuid, status: AgentStatus) -> Agent {
    for _ in 0..500 {
        let agent = h.engine.lifecycle.get(h.tenant, id).await.unwrap();
        if agent.status == status {
            return agent;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("agent {id} never reached {status}");
}

async fn wait_for_run(h: &Harness, id: Uuid, done: impl Fn(RunStatus) -> bool) -> Run {
    for _ in 0..500 {
        let run = h.engine.orchestrator.get(h.tenant, id).await.unwrap();
        if done(run.status) {
            return run;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("run {id} never reached the expected status");
}

async fn wait_terminal(h: &Harness, id: Uuid) -> Run {
    wait_for_run(h, id, |s| s.is_terminal()).await
}

async fn ready_agent(h: &Harness, provider: &str, config: AgentConfig) -> Agent {
    let agent = h
        .engine
        .lifecycle
        .create_agent(h.tenant, new_agent(provider, config))
        .await
        .unwrap();
    h.engine.lifecycle.launch(h.tenant, agent.id).await.unwrap();
    wait_for_agent(h, agent.id, AgentStatus::Ready).await
}

// ===========================================================================
// Happy path
// ===========================================================================

#[tokio::test]
async fn test_completed_run_records_output_and_cost() {
    let h = harness(MockAdapter::new().with_reply("three bullet points", 1000, 500));
    let agent = ready_agent(&h, "mock", quick_config()).await;

    let run = h
        .engine
        .orchestrator
        .create_run(h.tenant, agent.id, "Summarize this", None)
        .await
        .unwrap();
    assert_eq!(run.status, RunStatus::Pending);

    let run = wait_terminal(&h, run.id).await;
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.output.as_deref(), Some("three bullet points"));
    assert_eq!(run.usage.input_tokens, 1000);
    assert_eq!(run.usage.output_tokens, 500);
    assert!((run.cost - 0.0125).abs() < 1e-9, "cost was {}", run.cost);
    assert_eq!(run.attempts, 1);
    assert!(run.ended_at.is_some());

    let agent = wait_for_agent(&h, agent.id, AgentStatus::Ready).await;
    assert!(agent.last_error.is_none());

    let costs = h.store.list_costs(h.tenant, agent.id).await.unwrap();
    assert_eq!(costs.len(), 1);
    assert_eq!(costs[0].run_id, run.id);
    assert!((costs[0].cost - 0.0125).abs() < 1e-9);
}

#[tokio::test]
async fn test_request_carries_instructions_briefing_and_context() {
    let h = harness(MockAdapter::new());
    let agent = ready_agent(&h, "mock", quick_config()).await;

    let run = h
        .engine
        .orchestrator
        .create_run(h.tenant, agent.id, "Go", Some("Quarterly report".into()))
        .await
        .unwrap();
    wait_terminal(&h, run.id).await;

    let requests = h.mock.captured_requests();
    assert_eq!(requests.len(), 1);
    let system = &requests[0].messages[0].content;
    assert!(system.starts_with("Summarize the input."));
    assert!(system.contains("mock/mock-model"));
    assert_eq!(requests[0].messages[1].content, "Quarterly report\n\nGo");
}

#[tokio::test]
async fn test_run_finished_event_is_published() {
    let h = harness(MockAdapter::new());
    let agent = ready_agent(&h, "mock", quick_config()).await;
    let rx = h.engine.events().subscribe();

    let run = h
        .engine
        .orchestrator
        .create_run(h.tenant, agent.id, "Go", None)
        .await
        .unwrap();
    wait_terminal(&h, run.id).await;

    let finished = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let EngineEvent::RunFinished { run_id, status, .. } = rx.recv_async().await.unwrap() {
                return (run_id, status);
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(finished, (run.id, RunStatus::Completed));
}

#[tokio::test]
async fn test_list_runs_newest_first() {
    let h = harness(MockAdapter::new());
    let agent = ready_agent(&h, "mock", quick_config()).await;

    let mut ids = Vec::new();
    for prompt in ["one", "two"] {
        let run = h
            .engine
            .orchestrator
            .create_run(h.tenant, agent.id, prompt, None)
            .await
            .unwrap();
        wait_terminal(&h, run.id).await;
        wait_for_agent(&h, agent.id, AgentStatus::Ready).await;
        ids.push(run.id);
    }

    let runs = h.engine.orchestrator.list_runs(h.tenant, agent.id).await.unwrap();
    let listed: Vec<Uuid> = runs.iter().map(|r| r.id).collect();
    assert_eq!(listed, vec![ids[1], ids[0]]);
}

// ===========================================================================
// Preconditions
// ===========================================================================

#[tokio::test]
async fn test_empty_prompt_is_bad_request() {
    let h = harness(MockAdapter::new());
    let agent = ready_agent(&h, "mock", quick_config()).await;
    let err = h
        .engine
        .orchestrator
        .create_run(h.tenant, agent.id, "   ", None)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::BadRequest(_)));
}

#[tokio::test]
async fn test_agent_not_ready_for_every_other_status() {
    let h = harness(MockAdapter::new());
    let agent = h
        .engine
        .lifecycle
        .create_agent(h.tenant, new_agent("mock", quick_config()))
        .await
        .unwrap();

    for status in AgentStatus::ALL {
        if status == AgentStatus::Ready {
            continue;
        }
        let mut stored = h.store.get_agent(h.tenant, agent.id).await.unwrap().unwrap();
        stored.status = status;
        h.store.update_agent(&stored).await.unwrap();

        let err = h
            .engine
            .orchestrator
            .create_run(h.tenant, agent.id, "Go", None)
            .await
            .unwrap_err();
        match err {
            OrchestratorError::AgentNotReady { id, status: got } => {
                assert_eq!(id, agent.id);
                assert_eq!(got, status);
            }
            other => panic!("expected AgentNotReady for {status}, got {other:?}"),
        }
    }
    assert!(h.store.list_runs_for_agent(h.tenant, agent.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_or_foreign_agent_is_not_found() {
    let h = harness(MockAdapter::new());
    let agent = ready_agent(&h, "mock", quick_config()).await;

    let err = h
        .engine
        .orchestrator
        .create_run(Uuid::new_v4(), agent.id, "Go", None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "not_found");

    let err = h
        .engine
        .orchestrator
        .create_run(h.tenant, Uuid::new_v4(), "Go", None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "not_found");
}

#[tokio::test]
async fn test_budget_exceeded_blocks_new_runs() {
    let h = harness(MockAdapter::new());
    let agent = ready_agent(
        &h,
        "mock",
        AgentConfig {
            budget_limit: 0.01,
            ..quick_config()
        },
    )
    .await;

    let past = Run::new(&agent, "earlier", None);
    h.store
        .record_cost(&CostRecord::for_run(&past, 0.02))
        .await
        .unwrap();

    let err = h
        .engine
        .orchestrator
        .create_run(h.tenant, agent.id, "Go", None)
        .await
        .unwrap_err();
    match err {
        OrchestratorError::BudgetExceeded { spent, limit } => {
            assert!((spent - 0.02).abs() < 1e-9);
            assert!((limit - 0.01).abs() < 1e-9);
        }
        other => panic!("expected BudgetExceeded, got {other:?}"),
    }
    assert!(h.store.list_runs_for_agent(h.tenant, agent.id).await.unwrap().is_empty());
    assert_eq!(h.mock.call_count(), 0);
}

#[tokio::test]
async fn test_unknown_provider_creates_no_run() {
    let h = harness(MockAdapter::new());
    let agent = ready_agent(&h, "nonexistent", quick_config()).await;

    let err = h
        .engine
        .orchestrator
        .create_run(h.tenant, agent.id, "Go", None)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::ProviderNotFound(ref name) if name == "nonexistent"));
    assert!(h.store.list_runs_for_agent(h.tenant, agent.id).await.unwrap().is_empty());

    let agent = h.engine.lifecycle.get(h.tenant, agent.id).await.unwrap();
    assert_eq!(agent.status, AgentStatus::Ready);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_create_run_admits_one() {
    let h = harness(MockAdapter::new().with_delay(Duration::from_millis(500)));
    let agent = ready_agent(&h, "mock", quick_config()).await;

    let mut handles = Vec::new();
    for i in 0..16 {
        let orchestrator: Arc<ExecutionOrchestrator> = Arc::clone(&h.engine.orchestrator);
        let (tenant, id) = (h.tenant, agent.id);
        handles.push(tokio::spawn(async move {
            orchestrator.create_run(tenant, id, format!("task {i}"), None).await
        }));
    }

    let mut admitted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => admitted += 1,
            Err(OrchestratorError::AgentNotReady { .. })
            | Err(OrchestratorError::RunInProgress { .. }) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(admitted, 1);
    assert_eq!(
        h.store.list_runs_for_agent(h.tenant, agent.id).await.unwrap().len(),
        1
    );
}

// ===========================================================================
// Failures
// ===========================================================================

#[tokio::test]
async fn test_provider_failure_fails_run_and_errors_agent() {
    let h = harness(MockAdapter::new().with_error(ProviderError::http("mock", 400, "bad model")));
    let agent = ready_agent(&h, "mock", quick_config()).await;

    let run = h
        .engine
        .orchestrator
        .create_run(h.tenant, agent.id, "Go", None)
        .await
        .unwrap();
    let run = wait_terminal(&h, run.id).await;
    assert_eq!(run.status, RunStatus::Failed);
    let error = run.error.unwrap();
    assert!(error.contains("400"), "{error}");
    assert!(error.contains("bad model"), "{error}");

    let agent = wait_for_agent(&h, agent.id, AgentStatus::Error).await;
    assert_eq!(agent.last_error.as_deref(), Some(error.as_str()));
    assert!(h.store.list_costs(h.tenant, agent.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_slow_provider_times_out() {
    let h = harness(MockAdapter::new().with_delay(Duration::from_secs(3)));
    let agent = ready_agent(
        &h,
        "mock",
        AgentConfig {
            timeout_secs: 1,
            ..quick_config()
        },
    )
    .await;

    let run = h
        .engine
        .orchestrator
        .create_run(h.tenant, agent.id, "Go", None)
        .await
        .unwrap();
    let run = wait_terminal(&h, run.id).await;
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error.unwrap().contains("timed out"));
    wait_for_agent(&h, agent.id, AgentStatus::Error).await;
}

#[tokio::test]
async fn test_retryable_error_is_retried() {
    let h = harness(
        MockAdapter::new()
            .with_error(ProviderError::http("mock", 503, "overloaded"))
            .with_reply("second time lucky", 10, 10),
    );
    let agent = ready_agent(
        &h,
        "mock",
        AgentConfig {
            retry: RetryPolicy {
                max_retries: 2,
                backoff_ms: 10,
            },
            ..AgentConfig::default()
        },
    )
    .await;

    let run = h
        .engine
        .orchestrator
        .create_run(h.tenant, agent.id, "Go", None)
        .await
        .unwrap();
    let run = wait_terminal(&h, run.id).await;
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.attempts, 2);
    assert_eq!(h.mock.call_count(), 2);
}

#[tokio::test]
async fn test_error_message_is_bounded() {
    let long = "x".repeat(5000);
    let h = harness(MockAdapter::new().with_error(ProviderError::unsupported("mock", long)));
    let agent = ready_agent(&h, "mock", quick_config()).await;

    let run = h
        .engine
        .orchestrator
        .create_run(h.tenant, agent.id, "Go", None)
        .await
        .unwrap();
    let run = wait_terminal(&h, run.id).await;
    assert!(run.error.unwrap().chars().count() <= 1001);
}

// ===========================================================================
// Cancellation
// ===========================================================================

#[tokio::test]
async fn test_cancel_running_run() {
    let h = harness(MockAdapter::new().with_delay(Duration::from_secs(5)));
    let agent = ready_agent(&h, "mock", quick_config()).await;

    let run = h
        .engine
        .orchestrator
        .create_run(h.tenant, agent.id, "Go", None)
        .await
        .unwrap();
    wait_for_run(&h, run.id, |s| s == RunStatus::Running).await;

    let cancelled = h.engine.orchestrator.cancel(h.tenant, run.id).await.unwrap();
    assert_eq!(cancelled.status, RunStatus::Cancelled);
    assert!(cancelled.ended_at.is_some());

    let agent = h.engine.lifecycle.get(h.tenant, agent.id).await.unwrap();
    assert_eq!(agent.status, AgentStatus::Ready);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let stored = h.engine.orchestrator.get(h.tenant, run.id).await.unwrap();
    assert_eq!(stored.status, RunStatus::Cancelled);
    assert!(stored.output.is_none());
    assert!(h.store.list_costs(h.tenant, agent.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cancel_terminal_run_is_not_cancellable() {
    let h = harness(MockAdapter::new());
    let agent = ready_agent(&h, "mock", quick_config()).await;

    let run = h
        .engine
        .orchestrator
        .create_run(h.tenant, agent.id, "Go", None)
        .await
        .unwrap();
    wait_terminal(&h, run.id).await;

    let err = h.engine.orchestrator.cancel(h.tenant, run.id).await.unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::NotCancellable {
            status: RunStatus::Completed,
            ..
        }
    ));
    assert_eq!(err.kind(), "not_cancellable");
}

#[tokio::test]
async fn test_cancel_unknown_run_is_not_found() {
    let h = harness(MockAdapter::new());
    let err = h
        .engine
        .orchestrator
        .cancel(h.tenant, Uuid::new_v4())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "not_found");
}

#[tokio::test]
async fn test_shutdown_fails_in_flight_runs() {
    let h = harness(MockAdapter::new().with_delay(Duration::from_secs(5)));
    let agent = ready_agent(&h, "mock", quick_config()).await;

    let run = h
        .engine
        .orchestrator
        .create_run(h.tenant, agent.id, "Go", None)
        .await
        .unwrap();
    wait_for_run(&h, run.id, |s| s == RunStatus::Running).await;

    assert!(h.engine.shutdown().await);
    let run = h.engine.orchestrator.get(h.tenant, run.id).await.unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error.as_deref(), Some("interrupted by shutdown"));

    let agent = h.engine.lifecycle.get(h.tenant, agent.id).await.unwrap();
    assert_eq!(agent.status, AgentStatus::Error);
}

#[tokio::test]
async fn test_create_run_after_shutdown_leaves_no_run() {
    let h = harness(MockAdapter::new());
    let agent = ready_agent(&h, "mock", quick_config()).await;
    assert!(h.engine.shutdown().await);

    let err = h
        .engine
        .orchestrator
        .create_run(h.tenant, agent.id, "Go", None)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Pool(_)), "{err:?}");

    let runs = h.engine.orchestrator.list_runs(h.tenant, agent.id).await.unwrap();
    assert!(runs.is_empty());
    let agent = h.engine.lifecycle.get(h.tenant, agent.id).await.unwrap();
    assert_eq!(agent.status, AgentStatus::Ready);
}

// ===========================================================================
// Tenant credentials
// ===========================================================================

struct FixedCredential;

#[async_trait]
impl CredentialSource for FixedCredential {
    async fn credential(&self, _tenant: TenantId, provider: &str) -> Option<TenantCredential> {
        (provider == "openai").then(|| TenantCredential {
            api_key: "sk-tenant".into(),
            base_url: Some("http://127.0.0.1:9".into()),
        })
    }
}

#[tokio::test]
async fn test_tenant_credential_builds_an_adapter_on_demand() {
    let h = harness(MockAdapter::new());
    let agent = ready_agent(&h, "openai", quick_config()).await;

    let orchestrator =
        ExecutionOrchestrator::new(Arc::clone(&h.engine.context)).with_credentials(Arc::new(FixedCredential));
    let run = orchestrator
        .create_run(h.tenant, agent.id, "Go", None)
        .await
        .unwrap();

    let run = wait_terminal(&h, run.id).await;
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error.unwrap().starts_with("openai"));

    let debug = format!("{:?}", FixedCredential.credential(h.tenant, "openai").await.unwrap());
    assert!(!debug.contains("sk-tenant"));
}

struct EveryProviderCredential;

#[async_trait]
impl CredentialSource for EveryProviderCredential {
    async fn credential(&self, _tenant: TenantId, _provider: &str) -> Option<TenantCredential> {
        Some(TenantCredential {
            api_key: "sk-tenant".into(),
            base_url: None,
        })
    }
}

#[tokio::test]
async fn test_tenant_credential_ignored_for_custom_provider() {
    let h = harness(MockAdapter::new());
    let agent = ready_agent(&h, "mock", quick_config()).await;

    let orchestrator = ExecutionOrchestrator::new(Arc::clone(&h.engine.context))
        .with_credentials(Arc::new(EveryProviderCredential));
    let run = orchestrator
        .create_run(h.tenant, agent.id, "Go", None)
        .await
        .unwrap();

    let run = wait_terminal(&h, run.id).await;
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(h.mock.call_count(), 1);
}
