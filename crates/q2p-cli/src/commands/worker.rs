//! Worker command implementation.

use crate::server::{start_server, ServerState};
use anyhow::Result;
use q2p_core::{Config, IngestionWorker};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Run the ingestion worker until a signal arrives or intake halts.
pub async fn run(config: Config) -> Result<()> {
    info!(
        queue = %config.queue.url,
        source = %config.storage.source,
        destination = %config.storage.destination,
        max_in_flight = config.worker.max_in_flight,
        "Starting ingestion worker"
    );

    let health_port = config.monitoring.health_port;
    let worker = Arc::new(IngestionWorker::from_config(&config).await?);

    let shutdown = CancellationToken::new();

    let server_state = Arc::new(ServerState {
        health: Arc::clone(worker.health()),
        metrics: Arc::clone(worker.metrics()),
        failures: Arc::clone(worker.failures()),
        queue: Some(worker.queue()),
    });
    let server_shutdown = CancellationToken::new();
    let server = tokio::spawn(start_server(
        server_state,
        health_port,
        server_shutdown.clone(),
    ));

    // SIGINT and SIGTERM cancel the worker
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    error!(error = %e, "Failed to install SIGTERM handler");
                    let _ = tokio::signal::ctrl_c().await;
                    signal_shutdown.cancel();
                    return;
                }
            };

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received Ctrl+C, initiating graceful shutdown");
        }

        signal_shutdown.cancel();
    });

    let result = Arc::clone(&worker).run(shutdown).await;

    server_shutdown.cancel();
    let _ = server.await;

    let summary = result?;
    info!(
        records = summary.records,
        acknowledged = summary.acknowledged,
        released = summary.released,
        "Ingestion worker stopped"
    );
    Ok(())
}
