use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use tokio_rusqlite::Connection;
use uuid::Uuid;

use super::{AgentStore, CostLedger, RunStore, StoreError};
use crate::types::{Agent, AgentConfig, CostRecord, Run, RunStatus, TenantId, TokenUsage};

/// Async SQLite-backed store for agents, runs, and costs.
pub struct SqliteStore {
    conn: Connection,
}

// ---------------------------------------------------------------------------
// helpers - values <-> SQLite text
// ---------------------------------------------------------------------------

fn enum_to_sql<T: serde::Serialize>(val: &T) -> String {
    serde_json::to_value(val)
        .ok()
        .and_then(|v| v.as_str().map(str::to_owned))
        .unwrap_or_default()
}

fn enum_from_sql<T: serde::de::DeserializeOwned>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_value(serde_json::Value::String(raw.to_owned()))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Fixed-width UTC timestamps so lexical order matches time order.
fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn ts_from_sql(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn uuid_from_sql(idx: usize, raw: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn usage_from_sql(row: &rusqlite::Row<'_>, first: usize) -> rusqlite::Result<TokenUsage> {
    let input: i64 = row.get(first)?;
    let output: i64 = row.get(first + 1)?;
    Ok(TokenUsage::new(input.max(0) as u64, output.max(0) as u64))
}

const AGENT_COLUMNS: &str = "id, tenant_id, name, provider, model, instructions, config, status,
    briefing, last_error, version, created_at, updated_at, deleted_at";

const RUN_COLUMNS: &str = "id, tenant_id, agent_id, prompt, context, status, provider, model,
    output, finish_reason, input_tokens, output_tokens, cost, attempts, error,
    started_at, ended_at";

const COST_COLUMNS: &str =
    "id, tenant_id, agent_id, run_id, provider, model, input_tokens, output_tokens, cost, created_at";

enum UpdateOutcome<T> {
    Done(T),
    Missing,
    Conflict(u64),
    Finalized,
}

impl SqliteStore {
    /// Open (or create) a database at the given file path.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref()).await?;
        let store = Self { conn };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create a purely in-memory database (useful for tests).
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        let store = Self { conn };
        store.init_schema().await?;
        Ok(store)
    }

    // -----------------------------------------------------------------------
    // Schema
    // -----------------------------------------------------------------------

    async fn init_schema(&self) -> Result<(), StoreError> {
        self.conn
            .call(|conn| {
                conn.execute_batch(
                    "
                    PRAGMA journal_mode=WAL;
                    PRAGMA synchronous=NORMAL;
                    PRAGMA busy_timeout=5000;

                    CREATE TABLE IF NOT EXISTS agents (
                        id           TEXT PRIMARY KEY,
                        tenant_id    TEXT NOT NULL,
                        name         TEXT NOT NULL,
                        provider     TEXT NOT NULL,
                        model        TEXT NOT NULL,
                        instructions TEXT NOT NULL,
                        config       TEXT NOT NULL,
                        status       TEXT NOT NULL,
                        briefing     TEXT,
                        last_error   TEXT,
                        version      INTEGER NOT NULL,
                        created_at   TEXT NOT NULL,
                        updated_at   TEXT NOT NULL,
                        deleted_at   TEXT
                    );

                    CREATE INDEX IF NOT EXISTS idx_agents_tenant ON agents(tenant_id);

                    CREATE TABLE IF NOT EXISTS runs (
                        id            TEXT PRIMARY KEY,
                        tenant_id     TEXT NOT NULL,
                        agent_id      TEXT NOT NULL,
                        prompt        TEXT NOT NULL,
                        context       TEXT,
                        status        TEXT NOT NULL,
                        provider      TEXT NOT NULL,
                        model         TEXT NOT NULL,
                        output        TEXT,
                        finish_reason TEXT,
                        input_tokens  INTEGER NOT NULL DEFAULT 0,
                        output_tokens INTEGER NOT NULL DEFAULT 0,
                        cost          REAL NOT NULL DEFAULT 0,
                        attempts      INTEGER NOT NULL DEFAULT 0,
                        error         TEXT,
                        started_at    TEXT NOT NULL,
                        ended_at      TEXT
                    );

                    CREATE INDEX IF NOT EXISTS idx_runs_agent ON runs(tenant_id, agent_id);

                    CREATE TABLE IF NOT EXISTS costs (
                        id            TEXT PRIMARY KEY,
                        tenant_id     TEXT NOT NULL,
                        agent_id      TEXT NOT NULL,
                        run_id        TEXT NOT NULL,
                        provider      TEXT NOT NULL,
                        model         TEXT NOT NULL,
                        input_tokens  INTEGER NOT NULL,
                        output_tokens INTEGER NOT NULL,
                        cost          REAL NOT NULL,
                        created_at    TEXT NOT NULL
                    );

                    CREATE INDEX IF NOT EXISTS idx_costs_agent ON costs(tenant_id, agent_id, created_at);
                    ",
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Agents
// ---------------------------------------------------------------------------

fn row_to_agent(row: &rusqlite::Row<'_>) -> rusqlite::Result<Agent> {
    let id: String = row.get(0)?;
    let tenant: String = row.get(1)?;
    let config: String = row.get(6)?;
    let status: String = row.get(7)?;
    let version: i64 = row.get(10)?;
    let created_at: String = row.get(11)?;
    let updated_at: String = row.get(12)?;
    let deleted_at: Option<String> = row.get(13)?;

    Ok(Agent {
        id: uuid_from_sql(0, &id)?,
        tenant_id: uuid_from_sql(1, &tenant)?,
        name: row.get(2)?,
        provider: row.get(3)?,
        model: row.get(4)?,
        instructions: row.get(5)?,
        config: serde_json::from_str::<AgentConfig>(&config)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?,
        status: enum_from_sql(7, &status)?,
        briefing: row.get(8)?,
        last_error: row.get(9)?,
        version: version.max(0) as u64,
        created_at: ts_from_sql(11, &created_at)?,
        updated_at: ts_from_sql(12, &updated_at)?,
        deleted_at: deleted_at.map(|s| ts_from_sql(13, &s)).transpose()?,
    })
}

#[async_trait]
impl AgentStore for SqliteStore {
    async fn insert_agent(&self, agent: &Agent) -> Result<(), StoreError> {
        let agent = agent.clone();
        let config =
            serde_json::to_string(&agent.config).map_err(|e| StoreError::Backend(e.to_string()))?;
        self.conn
            .call(move |conn| {
                conn.execute(
                    &format!(
                        "INSERT INTO agents ({AGENT_COLUMNS})
                         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)"
                    ),
                    rusqlite::params![
                        agent.id.to_string(),
                        agent.tenant_id.to_string(),
                        agent.name,
                        agent.provider,
                        agent.model,
                        agent.instructions,
                        config,
                        enum_to_sql(&agent.status),
                        agent.briefing,
                        agent.last_error,
                        agent.version as i64,
                        ts(&agent.created_at),
                        ts(&agent.updated_at),
                        agent.deleted_at.as_ref().map(ts),
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn get_agent(&self, tenant: TenantId, id: Uuid) -> Result<Option<Agent>, StoreError> {
        let agent = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {AGENT_COLUMNS} FROM agents WHERE id = ?1 AND tenant_id = ?2"
                ))?;
                let mut rows = stmt.query(rusqlite::params![id.to_string(), tenant.to_string()])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_agent(row)?)),
                    None => Ok(None),
                }
            })
            .await?;
        Ok(agent)
    }

    async fn list_agents(&self, tenant: TenantId) -> Result<Vec<Agent>, StoreError> {
        let agents = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {AGENT_COLUMNS} FROM agents
                     WHERE tenant_id = ?1 AND deleted_at IS NULL
                     ORDER BY created_at ASC"
                ))?;
                let mut rows = stmt.query(rusqlite::params![tenant.to_string()])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_agent(row)?);
                }
                Ok(out)
            })
            .await?;
        Ok(agents)
    }

    async fn update_agent(&self, agent: &Agent) -> Result<Agent, StoreError> {
        let mut next = agent.clone();
        next.version = agent.version + 1;
        next.updated_at = Utc::now();
        let expected = agent.version;
        let config =
            serde_json::to_string(&next.config).map_err(|e| StoreError::Backend(e.to_string()))?;
        let row = next.clone();

        let outcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let found: Option<i64> = {
                    let mut stmt = tx.prepare(
                        "SELECT version FROM agents WHERE id = ?1 AND tenant_id = ?2",
                    )?;
                    let mut rows =
                        stmt.query(rusqlite::params![row.id.to_string(), row.tenant_id.to_string()])?;
                    match rows.next()? {
                        Some(r) => Some(r.get(0)?),
                        None => None,
                    }
                };
                let outcome = match found {
                    None => UpdateOutcome::Missing,
                    Some(v) if v as u64 != expected => UpdateOutcome::Conflict(v as u64),
                    Some(_) => {
                        tx.execute(
                            "UPDATE agents SET name=?2, provider=?3, model=?4, instructions=?5,
                                config=?6, status=?7, briefing=?8, last_error=?9, version=?10,
                                updated_at=?11, deleted_at=?12
                             WHERE id = ?1",
                            rusqlite::params![
                                row.id.to_string(),
                                row.name,
                                row.provider,
                                row.model,
                                row.instructions,
                                config,
                                enum_to_sql(&row.status),
                                row.briefing,
                                row.last_error,
                                row.version as i64,
                                ts(&row.updated_at),
                                row.deleted_at.as_ref().map(ts),
                            ],
                        )?;
                        UpdateOutcome::Done(())
                    }
                };
                tx.commit()?;
                Ok(outcome)
            })
            .await?;

        match outcome {
            UpdateOutcome::Done(()) => Ok(next),
            UpdateOutcome::Missing | UpdateOutcome::Finalized => Err(StoreError::NotFound(agent.id)),
            UpdateOutcome::Conflict(found) => Err(StoreError::Conflict {
                id: agent.id,
                expected,
                found,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

fn row_to_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<Run> {
    let id: String = row.get(0)?;
    let tenant: String = row.get(1)?;
    let agent_id: String = row.get(2)?;
    let status: String = row.get(5)?;
    let attempts: i64 = row.get(13)?;
    let started_at: String = row.get(15)?;
    let ended_at: Option<String> = row.get(16)?;

    Ok(Run {
        id: uuid_from_sql(0, &id)?,
        tenant_id: uuid_from_sql(1, &tenant)?,
        agent_id: uuid_from_sql(2, &agent_id)?,
        prompt: row.get(3)?,
        context: row.get(4)?,
        status: enum_from_sql(5, &status)?,
        provider: row.get(6)?,
        model: row.get(7)?,
        output: row.get(8)?,
        finish_reason: row.get(9)?,
        usage: usage_from_sql(row, 10)?,
        cost: row.get(12)?,
        attempts: attempts.max(0) as u32,
        error: row.get(14)?,
        started_at: ts_from_sql(15, &started_at)?,
        ended_at: ended_at.map(|s| ts_from_sql(16, &s)).transpose()?,
    })
}

fn run_params(run: &Run) -> [Box<dyn rusqlite::ToSql + Send>; 17] {
    [
        Box::new(run.id.to_string()),
        Box::new(run.tenant_id.to_string()),
        Box::new(run.agent_id.to_string()),
        Box::new(run.prompt.clone()),
        Box::new(run.context.clone()),
        Box::new(enum_to_sql(&run.status)),
        Box::new(run.provider.clone()),
        Box::new(run.model.clone()),
        Box::new(run.output.clone()),
        Box::new(run.finish_reason.clone()),
        Box::new(run.usage.input_tokens as i64),
        Box::new(run.usage.output_tokens as i64),
        Box::new(run.cost),
        Box::new(run.attempts as i64),
        Box::new(run.error.clone()),
        Box::new(ts(&run.started_at)),
        Box::new(run.ended_at.as_ref().map(ts)),
    ]
}

#[async_trait]
impl RunStore for SqliteStore {
    async fn insert_run(&self, run: &Run) -> Result<(), StoreError> {
        let params = run_params(run);
        self.conn
            .call(move |conn| {
                conn.execute(
                    &format!(
                        "INSERT INTO runs ({RUN_COLUMNS})
                         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17)"
                    ),
                    rusqlite::params_from_iter(params.iter()),
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn get_run(&self, tenant: TenantId, id: Uuid) -> Result<Option<Run>, StoreError> {
        let run = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {RUN_COLUMNS} FROM runs WHERE id = ?1 AND tenant_id = ?2"
                ))?;
                let mut rows = stmt.query(rusqlite::params![id.to_string(), tenant.to_string()])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_run(row)?)),
                    None => Ok(None),
                }
            })
            .await?;
        Ok(run)
    }

    async fn update_run(&self, run: &Run) -> Result<(), StoreError> {
        let params = run_params(run);
        let id = run.id;
        let tenant = run.tenant_id;
        let outcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let status: Option<String> = {
                    let mut stmt =
                        tx.prepare("SELECT status FROM runs WHERE id = ?1 AND tenant_id = ?2")?;
                    let mut rows =
                        stmt.query(rusqlite::params![id.to_string(), tenant.to_string()])?;
                    match rows.next()? {
                        Some(r) => Some(r.get(0)?),
                        None => None,
                    }
                };
                let outcome = match status {
                    None => UpdateOutcome::Missing,
                    Some(s) if enum_from_sql::<RunStatus>(0, &s)?.is_terminal() => {
                        UpdateOutcome::Finalized
                    }
                    Some(_) => {
                        tx.execute(
                            "UPDATE runs SET prompt=?4, context=?5, status=?6, provider=?7,
                                model=?8, output=?9, finish_reason=?10, input_tokens=?11,
                                output_tokens=?12, cost=?13, attempts=?14, error=?15,
                                started_at=?16, ended_at=?17
                             WHERE id = ?1 AND tenant_id = ?2 AND agent_id = ?3",
                            rusqlite::params_from_iter(params.iter()),
                        )?;
                        UpdateOutcome::Done(())
                    }
                };
                tx.commit()?;
                Ok(outcome)
            })
            .await?;

        match outcome {
            UpdateOutcome::Done(()) => Ok(()),
            UpdateOutcome::Missing => Err(StoreError::NotFound(id)),
            UpdateOutcome::Finalized => Err(StoreError::RunFinalized(id)),
            UpdateOutcome::Conflict(_) => Err(StoreError::Backend("unexpected conflict".into())),
        }
    }

    async fn list_runs_for_agent(
        &self,
        tenant: TenantId,
        agent_id: Uuid,
    ) -> Result<Vec<Run>, StoreError> {
        let runs = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {RUN_COLUMNS} FROM runs
                     WHERE tenant_id = ?1 AND agent_id = ?2
                     ORDER BY started_at DESC"
                ))?;
                let mut rows =
                    stmt.query(rusqlite::params![tenant.to_string(), agent_id.to_string()])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_run(row)?);
                }
                Ok(out)
            })
            .await?;
        Ok(runs)
    }

    async fn active_run_for_agent(
        &self,
        tenant: TenantId,
        agent_id: Uuid,
    ) -> Result<Option<Run>, StoreError> {
        let run = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {RUN_COLUMNS} FROM runs
                     WHERE tenant_id = ?1 AND agent_id = ?2
                       AND status IN ('pending', 'briefing', 'running')
                     LIMIT 1"
                ))?;
                let mut rows =
                    stmt.query(rusqlite::params![tenant.to_string(), agent_id.to_string()])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_run(row)?)),
                    None => Ok(None),
                }
            })
            .await?;
        Ok(run)
    }
}

// ---------------------------------------------------------------------------
// Cost ledger
// ---------------------------------------------------------------------------

fn row_to_cost(row: &rusqlite::Row<'_>) -> rusqlite::Result<CostRecord> {
    let id: String = row.get(0)?;
    let tenant: String = row.get(1)?;
    let agent_id: String = row.get(2)?;
    let run_id: String = row.get(3)?;
    let created_at: String = row.get(9)?;

    Ok(CostRecord {
        id: uuid_from_sql(0, &id)?,
        tenant_id: uuid_from_sql(1, &tenant)?,
        agent_id: uuid_from_sql(2, &agent_id)?,
        run_id: uuid_from_sql(3, &run_id)?,
        provider: row.get(4)?,
        model: row.get(5)?,
        usage: usage_from_sql(row, 6)?,
        cost: row.get(8)?,
        created_at: ts_from_sql(9, &created_at)?,
    })
}

#[async_trait]
impl CostLedger for SqliteStore {
    async fn record_cost(&self, record: &CostRecord) -> Result<(), StoreError> {
        let r = record.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    &format!(
                        "INSERT INTO costs ({COST_COLUMNS})
                         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)"
                    ),
                    rusqlite::params![
                        r.id.to_string(),
                        r.tenant_id.to_string(),
                        r.agent_id.to_string(),
                        r.run_id.to_string(),
                        r.provider,
                        r.model,
                        r.usage.input_tokens as i64,
                        r.usage.output_tokens as i64,
                        r.cost,
                        ts(&r.created_at),
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn sum_costs_since(
        &self,
        tenant: TenantId,
        agent_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<f64, StoreError> {
        let since = ts(&since);
        let total = self
            .conn
            .call(move |conn| {
                let total: f64 = conn.query_row(
                    "SELECT COALESCE(SUM(cost), 0.0) FROM costs
                     WHERE tenant_id = ?1 AND agent_id = ?2 AND created_at >= ?3",
                    rusqlite::params![tenant.to_string(), agent_id.to_string(), since],
                    |row| row.get(0),
                )?;
                Ok(total)
            })
            .await?;
        Ok(total)
    }

    async fn list_costs(
        &self,
        tenant: TenantId,
        agent_id: Uuid,
    ) -> Result<Vec<CostRecord>, StoreError> {
        let costs = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {COST_COLUMNS} FROM costs
                     WHERE tenant_id = ?1 AND agent_id = ?2
                     ORDER BY created_at ASC"
                ))?;
                let mut rows =
                    stmt.query(rusqlite::params![tenant.to_string(), agent_id.to_string()])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_cost(row)?);
                }
                Ok(out)
            })
            .await?;
        Ok(costs)
    }
}
