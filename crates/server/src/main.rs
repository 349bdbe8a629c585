//! mylore-worker entry point.
//!
//! Boots the offline worker and serves its control surface as an MCP server
//! on stdio. Logging goes to stderr to avoid interfering with the JSON-RPC
//! protocol on stdout.

use std::sync::Arc;

use anyhow::Result;
use mylore_client::{
    CacheGovernor, FetchConfig, Fetcher, GovernorConfig, HttpFetcher, LifecycleController, UpdateCoordinator,
};
use mylore_core::{AppConfig, CacheDb, WorkerVersion};
use rmcp::service::serve_server;
use rmcp::transport::io::stdio;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

mod error;
mod handler;
mod page;
mod source;
mod tools;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load()?;
    tracing::info!(
        origin = %config.origin,
        version = %config.cache_version,
        db_path = %config.db_path.display(),
        "starting mylore worker on stdio transport"
    );

    let db = CacheDb::open(&config.db_path).await?;
    let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(FetchConfig::from(&config))?);
    let controller = Arc::new(LifecycleController::new(
        db.clone(),
        Arc::clone(&fetcher),
        &config,
        Arc::new(source::ConfigSource),
    )?);

    if let Err(e) = controller.register(WorkerVersion::from_config(&config)).await {
        tracing::error!(error = %e, "initial install failed; requests pass through until an update installs");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let governor = CacheGovernor::new(db.clone(), controller.watch_dynamic(), GovernorConfig::from(&config));
    let governor_task = tokio::spawn(governor.run(shutdown_rx.clone()));

    let coordinator = UpdateCoordinator::connect(Arc::clone(&controller), Arc::new(page::LogPage)).await;
    let update_task = tokio::spawn(coordinator.run(config.update_interval(), shutdown_rx));

    let handler = handler::WorkerServer::new(Arc::clone(&controller), fetcher, db);
    let server = serve_server(handler, stdio()).await?;
    server.waiting().await?;

    shutdown_tx.send_replace(true);
    let (governor, update) = tokio::join!(governor_task, update_task);
    for (task, result) in [("governor", governor), ("update", update)] {
        if let Err(e) = result {
            tracing::error!(task, error = %e, "background task failed");
        }
    }
    if let Some(active) = controller.active_version().await {
        active.settle().await;
    }
    tracing::info!("mylore worker stopped");

    Ok(())
}
