//! Sheets sync server.
//!
//! Reads configuration from the environment, starts the sync services and
//! serves the admin API until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use core_runtime::config::ServiceConfig;
use core_runtime::logging::{init_logging, LoggingConfig};
use core_service::{bootstrap, http, SyncRuntime};
use tracing::{error, info};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging(LoggingConfig::from_env()?).context("failed to initialise logging")?;

    let config = ServiceConfig::from_env().context("invalid configuration")?;
    info!(config = ?config, "Starting sync server");

    let deps = bootstrap::build_dependencies(&config)?;
    let runtime = Arc::new(SyncRuntime::from_service_config(deps, &config)?);
    runtime.start().await;

    let router = http::build_router(Arc::clone(&runtime));
    let served = http::serve(router, config.http_port, shutdown_signal()).await;

    runtime.shutdown(SHUTDOWN_GRACE).await;
    served?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
