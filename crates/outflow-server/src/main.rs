use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

mod app;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "outflow_server=info,outflow_queue=info".into()),
        )
        .init();

    // load config: explicit OUTFLOW_CONFIG env > ~/.outflow/outflow.toml
    let config_path = std::env::var("OUTFLOW_CONFIG").ok();
    let config = outflow_core::OutflowConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        outflow_core::OutflowConfig::default()
    });

    let state = Arc::new(app::AppState::new(config)?);
    info!(db = %state.config.database.path, "outflow engine starting");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Reconnect persisted sessions in the background; failures only log.
    state.registry.reconnect_all();

    // Seed the recurring singleton jobs.
    if let Err(e) = state.poller.ensure_poll_jobs() {
        warn!(error = %e, "failed to seed reply poll jobs");
    }
    if let Err(e) = outflow_queue::CleanupHandler::ensure_scheduled(&state.queue) {
        warn!(error = %e, "failed to schedule cleanup job");
    }

    // Worker pool: campaign steps, reply polls, retention.
    let pool = state.worker_pool();
    let pool_task = tokio::spawn(pool.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    let _ = pool_task.await;

    info!("outflow engine stopped");
    Ok(())
}
