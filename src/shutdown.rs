use std::sync::Arc;
use std::time::Duration;

use tokio::signal;

use crate::server::AppState;

/// How long in-flight steps get to persist their state after a signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Wait for a shutdown signal (SIGINT or SIGTERM).
pub async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown...");
        }
    }
}

/// Let running steps finish so their state is saved and their locks released.
/// Pending tasks are dropped; the poller picks the workflows up on restart.
pub async fn graceful_shutdown(state: &Arc<AppState>) {
    tracing::info!("Starting graceful shutdown...");

    let pending = state.task_queue.read().await.pending_count();
    if pending > 0 {
        tracing::info!(count = pending, "Dropping pending steps");
    }

    let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
    loop {
        let in_flight = state.task_queue.read().await.in_flight_count();
        if in_flight == 0 {
            break;
        }
        if tokio::time::Instant::now() >= deadline {
            tracing::warn!(count = in_flight, "Steps still running at shutdown deadline");
            break;
        }
        tracing::info!(count = in_flight, "Waiting for in-flight steps");
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    tracing::info!("Graceful shutdown complete");
}
