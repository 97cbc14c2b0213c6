//! Binds the aggregator and its control listener to the process lifetime.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::{Aggregator, AggregatorError};
use crate::control::ControlServer;

/// Serve control connections, start the aggregator, and run until `shutdown`
/// resolves. Then stop the aggregator, wait for the workers to drain and close
/// the listener.
///
/// The listener is already bound, so a second instance fails before reaching
/// this point.
pub async fn run_until<F>(
    aggregator: Arc<Aggregator>,
    server: ControlServer,
    shutdown: F,
) -> Result<(), AggregatorError>
where
    F: Future<Output = ()>,
{
    let server_shutdown = CancellationToken::new();
    let server_task = tokio::spawn(server.serve(Arc::clone(&aggregator), server_shutdown.clone()));

    let result = run_aggregator(&aggregator, shutdown).await;

    server_shutdown.cancel();
    if let Err(e) = server_task.await {
        tracing::error!(error = %e, "Control listener task failed");
    }
    result
}

async fn run_aggregator<F>(aggregator: &Aggregator, shutdown: F) -> Result<(), AggregatorError>
where
    F: Future<Output = ()>,
{
    aggregator.start().await?;
    shutdown.await;

    tracing::info!(
        workers = aggregator.live_workers(),
        "Shutdown requested, waiting for workers to finish"
    );
    aggregator.stop().await
}

/// [`run_until`] driven by SIGINT or SIGTERM (Ctrl-C on other platforms).
pub async fn run_until_signal(
    aggregator: Arc<Aggregator>,
    server: ControlServer,
) -> Result<(), AggregatorError> {
    run_until(aggregator, server, shutdown_signal()).await
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "Failed to install signal handlers, falling back to Ctrl-C");
            ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
        _ = sigint.recv() => tracing::info!("Received SIGINT"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    ctrl_c().await;
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
