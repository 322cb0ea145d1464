use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Default maximum number of concurrent tasks when none is specified.
const DEFAULT_MAX_CONCURRENT: usize = 16;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("worker pool is shutting down")]
    ShuttingDown,
}

/// Bounded pool for background work (provider calls, briefings).
///
/// Submissions are tracked so shutdown can wait for them. At most
/// `max_concurrent` tasks run at once; the rest wait for a permit. Every
/// task can derive a child of the pool's shutdown token.
pub struct WorkerPool {
    gate: Arc<Semaphore>,
    max_concurrent: usize,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl WorkerPool {
    pub fn new(max_concurrent: usize) -> Self {
        let limit = if max_concurrent == 0 {
            warn!("max_concurrent was 0, defaulting to {DEFAULT_MAX_CONCURRENT}");
            DEFAULT_MAX_CONCURRENT
        } else {
            max_concurrent
        };
        Self {
            gate: Arc::new(Semaphore::new(limit)),
            max_concurrent: limit,
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Queue `task`. It starts once a permit is free, or never if the pool
    /// shuts down first.
    pub fn submit<F>(&self, task: F) -> Result<(), PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_shutting_down() {
            return Err(PoolError::ShuttingDown);
        }
        let gate = Arc::clone(&self.gate);
        self.tracker.spawn(async move {
            let Ok(_permit) = gate.acquire_owned().await else {
                debug!("worker pool closed before task started");
                return;
            };
            task.await;
        });
        Ok(())
    }

    /// A token cancelled on shutdown or when cancelled directly.
    pub fn child_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Tasks submitted and not yet finished, queued ones included.
    pub fn active(&self) -> usize {
        self.tracker.len()
    }

    pub fn available_slots(&self) -> usize {
        self.gate.available_permits()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Stop accepting work, cancel every task token, and wait up to `grace`
    /// for tracked tasks. Returns `false` if some were still running.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.closed.store(true, Ordering::Release);
        self.tracker.close();
        self.shutdown.cancel();
        info!(pending = self.tracker.len(), "worker pool draining");

        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => {
                info!("worker pool drained");
                true
            }
            Err(_) => {
                warn!(
                    pending = self.tracker.len(),
                    grace_secs = grace.as_secs(),
                    "worker pool tasks still running after grace period"
                );
                false
            }
        }
    }
}
