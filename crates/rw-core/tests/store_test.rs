use chrono::{Duration, Utc};
use rw_core::store::{AgentStore, MemoryStore, Repository, SqliteStore, StoreError};
use rw_core::types::{Agent, AgentStatus, CostRecord, Run, RunStatus, TokenUsage};
use uuid::Uuid;

async fn backends() -> Vec<(&'static str, Box<dyn Repository>)> {
    vec![
        ("memory", Box::new(MemoryStore::new())),
        (
            "sqlite",
            Box::new(SqliteStore::open_in_memory().await.expect("open sqlite")),
        ),
    ]
}

fn sample_agent(tenant: Uuid) -> Agent {
    Agent::new(tenant, "researcher", "openai", "gpt-4o").with_instructions("Be terse.")
}

#[tokio::test]
async fn agent_roundtrip_is_tenant_scoped() {
    for (name, store) in backends().await {
        let tenant = Uuid::new_v4();
        let agent = sample_agent(tenant);
        store.insert_agent(&agent).await.unwrap();

        let fetched = store.get_agent(tenant, agent.id).await.unwrap().unwrap();
        assert_eq!(fetched.name, "researcher", "{name}");
        assert_eq!(fetched.instructions, "Be terse.", "{name}");
        assert_eq!(fetched.status, AgentStatus::Configured, "{name}");

        let other = store.get_agent(Uuid::new_v4(), agent.id).await.unwrap();
        assert!(other.is_none(), "{name}: foreign tenant must not see agent");
    }
}

#[tokio::test]
async fn update_agent_bumps_version_and_detects_conflicts() {
    for (name, store) in backends().await {
        let tenant = Uuid::new_v4();
        let agent = sample_agent(tenant);
        store.insert_agent(&agent).await.unwrap();

        let mut first = agent.clone();
        first.status = AgentStatus::Briefing;
        let stored = store.update_agent(&first).await.unwrap();
        assert_eq!(stored.version, 1, "{name}");

        // Stale copy still carries version 0.
        let mut stale = agent.clone();
        stale.status = AgentStatus::Terminated;
        match store.update_agent(&stale).await {
            Err(StoreError::Conflict {
                expected, found, ..
            }) => {
                assert_eq!(expected, 0, "{name}");
                assert_eq!(found, 1, "{name}");
            }
            other => panic!("{name}: expected conflict, got {other:?}"),
        }

        let current = store.get_agent(tenant, agent.id).await.unwrap().unwrap();
        assert_eq!(current.status, AgentStatus::Briefing, "{name}");
    }
}

#[tokio::test]
async fn deleted_agents_are_hidden_from_listing() {
    for (name, store) in backends().await {
        let tenant = Uuid::new_v4();
        let keep = sample_agent(tenant);
        let mut gone = sample_agent(tenant);
        gone.name = "retired".into();
        store.insert_agent(&keep).await.unwrap();
        store.insert_agent(&gone).await.unwrap();

        gone.deleted_at = Some(Utc::now());
        store.update_agent(&gone).await.unwrap();

        let listed = store.list_agents(tenant).await.unwrap();
        assert_eq!(listed.len(), 1, "{name}");
        assert_eq!(listed[0].id, keep.id, "{name}");
        assert!(
            store.get_agent(tenant, gone.id).await.unwrap().unwrap().is_deleted(),
            "{name}"
        );
    }
}

#[tokio::test]
async fn terminal_runs_are_immutable() {
    for (name, store) in backends().await {
        let tenant = Uuid::new_v4();
        let agent = sample_agent(tenant);
        let mut run = Run::new(&agent, "summarize", None);
        store.insert_run(&run).await.unwrap();

        run.status = RunStatus::Running;
        store.update_run(&run).await.unwrap();
        assert!(
            store.active_run_for_agent(tenant, agent.id).await.unwrap().is_some(),
            "{name}"
        );

        run.output = Some("done".into());
        run.usage = TokenUsage::new(1000, 500);
        run.finish(RunStatus::Completed);
        store.update_run(&run).await.unwrap();
        assert!(
            store.active_run_for_agent(tenant, agent.id).await.unwrap().is_none(),
            "{name}"
        );

        run.finish(RunStatus::Cancelled);
        let err = store.update_run(&run).await.unwrap_err();
        assert!(matches!(err, StoreError::RunFinalized(_)), "{name}");

        let stored = store.get_run(tenant, run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Completed, "{name}");
        assert_eq!(stored.usage.total_tokens, 1500, "{name}");
        assert!(stored.ended_at.is_some(), "{name}");
    }
}

#[tokio::test]
async fn runs_list_newest_first() {
    for (name, store) in backends().await {
        let tenant = Uuid::new_v4();
        let agent = sample_agent(tenant);
        let mut older = Run::new(&agent, "one", None);
        older.started_at = Utc::now() - Duration::minutes(5);
        let newer = Run::new(&agent, "two", Some("ctx".into()));
        store.insert_run(&older).await.unwrap();
        store.insert_run(&newer).await.unwrap();

        let runs = store.list_runs_for_agent(tenant, agent.id).await.unwrap();
        assert_eq!(runs.len(), 2, "{name}");
        assert_eq!(runs[0].prompt, "two", "{name}");
        assert_eq!(runs[0].context.as_deref(), Some("ctx"), "{name}");
    }
}

#[tokio::test]
async fn cost_sum_respects_window() {
    for (name, store) in backends().await {
        let tenant = Uuid::new_v4();
        let agent = sample_agent(tenant);
        let run = Run::new(&agent, "p", None);

        let mut old = CostRecord::for_run(&run, 5.0);
        old.created_at = Utc::now() - Duration::days(45);
        store.record_cost(&old).await.unwrap();
        store.record_cost(&CostRecord::for_run(&run, 0.25)).await.unwrap();
        store.record_cost(&CostRecord::for_run(&run, 0.5)).await.unwrap();

        let since = Utc::now() - Duration::days(30);
        let total = store.sum_costs_since(tenant, agent.id, since).await.unwrap();
        assert!((total - 0.75).abs() < 1e-9, "{name}: {total}");

        let other = store
            .sum_costs_since(Uuid::new_v4(), agent.id, since)
            .await
            .unwrap();
        assert_eq!(other, 0.0, "{name}");

        assert_eq!(store.list_costs(tenant, agent.id).await.unwrap().len(), 3, "{name}");
    }
}

#[tokio::test]
async fn sqlite_store_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rw.db");
    let tenant = Uuid::new_v4();
    let agent = sample_agent(tenant);
    {
        let store = SqliteStore::open(&path).await.unwrap();
        store.insert_agent(&agent).await.unwrap();
    }
    let store = SqliteStore::open(&path).await.unwrap();
    let fetched = store.get_agent(tenant, agent.id).await.unwrap().unwrap();
    assert_eq!(fetched.config, agent.config);
}
