//! `slotwatch` worker binary: configuration from the environment, runs until SIGINT/SIGTERM.

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use slotwatch::builders::EngineBuilder;
use slotwatch::config::EngineConfig;
use slotwatch::infra::InMemoryCoordinator;
use slotwatch::runtime::install_shutdown_handler;
use slotwatch::util::init_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = EngineConfig::from_env()
        .map_err(anyhow::Error::msg)
        .context("failed to load configuration")?;
    info!(
        worker_id = %config.coordinator.worker_id,
        concurrency = config.scheduling.concurrency,
        pacing = ?config.pacing.authority,
        portal = ?config.session.portal_mode,
        "starting worker"
    );

    let shutdown = CancellationToken::new();
    install_shutdown_handler(&shutdown);

    let mut builder = EngineBuilder::new(config.clone()).shutdown(shutdown);
    if config.coordinator.api_base.is_empty() {
        warn!("API_BASE not set, running against an empty in-memory coordinator");
        builder = builder.coordinator(Arc::new(InMemoryCoordinator::new()));
    }
    let engine = builder.build().context("failed to assemble engine")?;

    let stats = engine.run().await;
    info!(
        ticks = stats.ticks,
        dispatched = stats.dispatched,
        completed = stats.completed,
        "worker stopped"
    );
    Ok(())
}
