//! runwarden daemon: loads config, opens storage, and serves the HTTP API
//! until ctrl-c.

use anyhow::{Context, Result};
use rw_core::config::Config;
use rw_daemon::daemon::Daemon;
use rw_telemetry::logging::{self, LogFormat};
use tracing::info;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let config = Config::load().context("failed to load configuration")?;
    logging::init(
        "rw-daemon",
        &config.general.log_level,
        LogFormat::from_config(&config.general.log_format),
    );
    info!(version = env!("CARGO_PKG_VERSION"), "runwarden daemon starting");

    let daemon = Daemon::new(config).await?;
    let shutdown = daemon.shutdown_handle();

    // Wire ctrl-c to trigger graceful shutdown.
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        info!("ctrl-c received, initiating shutdown");
        shutdown.cancel();
    });

    daemon.run().await
}
