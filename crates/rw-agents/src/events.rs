use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rw_core::types::{AgentStatus, RunStatus, TenantId};
use serde::Serialize;
use uuid::Uuid;

/// Engine notifications for audit logging and external sinks.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    AgentStatusChanged {
        tenant_id: TenantId,
        agent_id: Uuid,
        from: AgentStatus,
        to: AgentStatus,
        at: DateTime<Utc>,
    },
    RunFinished {
        tenant_id: TenantId,
        agent_id: Uuid,
        run_id: Uuid,
        status: RunStatus,
        cost: f64,
        error: Option<String>,
        at: DateTime<Utc>,
    },
}

impl EngineEvent {
    pub fn tenant_id(&self) -> TenantId {
        match self {
            EngineEvent::AgentStatusChanged { tenant_id, .. }
            | EngineEvent::RunFinished { tenant_id, .. } => *tenant_id,
        }
    }

    /// Write the event as a structured `info` log line.
    pub fn log(&self) {
        match self {
            EngineEvent::AgentStatusChanged {
                tenant_id,
                agent_id,
                from,
                to,
                ..
            } => tracing::info!(
                target: "audit",
                tenant_id = %tenant_id,
                agent_id = %agent_id,
                from = %from,
                to = %to,
                "agent status changed"
            ),
            EngineEvent::RunFinished {
                tenant_id,
                agent_id,
                run_id,
                status,
                cost,
                error,
                ..
            } => tracing::info!(
                target: "audit",
                tenant_id = %tenant_id,
                agent_id = %agent_id,
                run_id = %run_id,
                status = %status,
                cost = *cost,
                error = error.as_deref().unwrap_or(""),
                "run finished"
            ),
        }
    }
}

/// A broadcast-style event bus built on top of flume channels.
///
/// Each call to [`subscribe`](Self::subscribe) creates a new receiver that
/// sees every event published after the subscription. Cloning is cheap.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<Vec<flume::Sender<EngineEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn senders(&self) -> MutexGuard<'_, Vec<flume::Sender<EngineEvent>>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn subscribe(&self) -> flume::Receiver<EngineEvent> {
        let (tx, rx) = flume::unbounded();
        self.senders().push(tx);
        rx
    }

    /// Publish to all current subscribers, pruning dropped ones.
    pub fn publish(&self, event: EngineEvent) {
        self.senders().retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.senders().len()
    }
}

/// Log every event on the bus until all publishers are gone.
pub fn spawn_audit_logger(bus: &EventBus) -> tokio::task::JoinHandle<()> {
    let rx = bus.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv_async().await {
            event.log();
        }
    })
}
