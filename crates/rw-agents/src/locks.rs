use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// One async mutex per agent. Every read-modify-write of an agent's status,
/// and every run state change, happens under that agent's guard.
#[derive(Default)]
pub struct AgentLocks {
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl AgentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, agent_id: Uuid) -> OwnedMutexGuard<()> {
        // Clone the Arc out so the shard lock is released before awaiting.
        let mutex = Arc::clone(self.locks.entry(agent_id).or_default().value());
        mutex.lock_owned().await
    }

    /// Drop the entry for an agent nobody is holding.
    pub fn forget(&self, agent_id: Uuid) {
        self.locks
            .remove_if(&agent_id, |_, m| Arc::strong_count(m) == 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
