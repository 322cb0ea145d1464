use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use rw_agents::events::spawn_audit_logger;
use rw_agents::Engine;
use rw_bridge::http_api::{api_router, ApiState};
use rw_core::config::{Config, StorageBackend, StorageConfig};
use rw_core::store::{MemoryStore, Repository, SqliteStore};
use rw_providers::ProviderRegistry;

/// Open the repository named by `[storage]`.
pub async fn open_store(storage: &StorageConfig) -> Result<Arc<dyn Repository>> {
    match storage.backend {
        StorageBackend::Memory => {
            info!("using in-memory storage");
            Ok(Arc::new(MemoryStore::new()))
        }
        StorageBackend::Sqlite => {
            let raw = storage
                .path
                .as_deref()
                .context("storage.path is required for the sqlite backend")?;
            let path = expand_home(raw);
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            let store = SqliteStore::open(&path)
                .await
                .with_context(|| format!("failed to open database {}", path.display()))?;
            info!(path = %path.display(), "using sqlite storage");
            Ok(Arc::new(store))
        }
    }
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

/// The runwarden background daemon.
///
/// Serves the HTTP API until the shutdown token fires, then stops
/// accepting requests and drains in-flight runs within the configured
/// grace period.
pub struct Daemon {
    config: Config,
    engine: Arc<Engine>,
    shutdown: CancellationToken,
}

impl Daemon {
    /// Build a daemon over an already opened repository.
    pub fn with_store(config: Config, store: Arc<dyn Repository>) -> Self {
        let registry = Arc::new(ProviderRegistry::from_config(&config));
        let engine = Engine::new(store, registry, config.orchestrator.clone());
        Self {
            config,
            engine: Arc::new(engine),
            shutdown: CancellationToken::new(),
        }
    }

    /// Create a daemon, opening storage from config.
    pub async fn new(config: Config) -> Result<Self> {
        let store = open_store(&config.storage).await?;
        Ok(Self::with_store(config, store))
    }

    /// Returns a handle that can be used to trigger shutdown from another task.
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Bind `daemon.host:daemon.port` and serve until shutdown.
    pub async fn run(&self) -> Result<()> {
        let bind_addr = format!("{}:{}", self.config.daemon.host, self.config.daemon.port);
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("failed to bind {bind_addr}"))?;
        self.run_with_listener(listener).await
    }

    /// Serve on an already bound listener until shutdown.
    pub async fn run_with_listener(&self, listener: tokio::net::TcpListener) -> Result<()> {
        let audit = spawn_audit_logger(self.engine.events());
        let router = api_router(Arc::new(ApiState::new(Arc::clone(&self.engine))));
        let bind_addr = listener.local_addr()?;
        info!(%bind_addr, "API server listening");

        let token = self.shutdown.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
            .context("API server error")?;

        info!("API server stopped, draining runs");
        if !self.engine.shutdown().await {
            warn!(
                grace_secs = self.config.orchestrator.shutdown_grace_secs,
                "runs still in flight after grace period"
            );
        }
        audit.abort();
        info!("daemon stopped");
        Ok(())
    }
}
