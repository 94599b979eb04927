//! Background quality and hygiene passes.
//!
//! Two loops run beside the tick loop:
//!
//! - the **latency sweeper** re-classifies every locally-owned active
//!   connection on a fixed cadence, catching breaches between pings and
//!   re-checking warnings for recovery;
//! - the **stale reaper** evicts connections with no ping activity past
//!   the staleness bound.
//!
//! Both drive from `list_active_connections` but only act on connections
//! present in the local registry -- mutating a connection owned by another
//! node would break the single-owner discipline.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::connection;
use crate::state::{now_ms, AppState};

/// Run the latency sweep loop until shutdown is signalled.
pub async fn run_latency_sweeper(state: AppState, mut shutdown: watch::Receiver<bool>) {
    let interval = Duration::from_millis(state.config.latency.sweep_interval_ms.max(100));
    info!("latency sweeper starting");

    while !*shutdown.borrow() {
        sweep_once(&state).await;
        tokio::select! {
            _ = shutdown.changed() => {}
            () = tokio::time::sleep(interval) => {}
        }
    }

    info!("latency sweeper stopped");
}

/// One pass of the latency sweep.
pub async fn sweep_once(state: &AppState) {
    let connections = match state.store.list_active_connections().await {
        Ok(connections) => connections,
        Err(error) => {
            warn!(error = %error, "latency sweep listing failed");
            return;
        }
    };

    let thresholds = state.config.latency.thresholds();
    for connection in connections {
        let id = connection.connection_id;
        // enforce_latency dedups emissions, so overlapping with the
        // ping-path enforcement is harmless.
        if let Some(summary) = state.registry.latency_summary(id, &thresholds).await {
            connection::enforce_latency(state, id, summary).await;
        }
    }
}

/// Run the stale-connection reaper until shutdown is signalled.
pub async fn run_stale_reaper(state: AppState, mut shutdown: watch::Receiver<bool>) {
    let interval = Duration::from_secs((state.config.latency.stale_after_seconds / 2).max(1) as u64);
    info!("stale reaper starting");

    while !*shutdown.borrow() {
        reap_stale_once(&state).await;
        tokio::select! {
            _ = shutdown.changed() => {}
            () = tokio::time::sleep(interval) => {}
        }
    }

    info!("stale reaper stopped");
}

/// One pass of the stale reaper.
///
/// Rows are deleted even when the transport is not local: a row left
/// behind by a crashed node still needs garbage collection before its
/// TTL fires.
pub async fn reap_stale_once(state: &AppState) {
    let connections = match state.store.list_active_connections().await {
        Ok(connections) => connections,
        Err(error) => {
            warn!(error = %error, "stale reap listing failed");
            return;
        }
    };

    let stale_after_ms = state.config.latency.stale_after_seconds * 1000;
    let now = now_ms();

    for connection in connections {
        let id = connection.connection_id;
        if now - connection.last_activity_ms() <= stale_after_ms {
            continue;
        }

        info!(connection_id = %id,
            idle_ms = now - connection.last_activity_ms(),
            "evicting stale connection");

        if state.registry.contains(id).await {
            state.registry.close(id).await;
            state.registry.remove(id).await;
        }
        match state
            .store
            .update_connection_status(id, cadence_types::ConnectionStatus::Disconnected, None)
            .await
        {
            Ok(()) | Err(cadence_store::StoreError::InvalidTransition { .. })
            | Err(cadence_store::StoreError::NotFound(_)) => {}
            Err(error) => {
                warn!(connection_id = %id, error = %error, "stale status write failed");
            }
        }
        if let Err(error) = state.store.delete_connection(id).await {
            warn!(connection_id = %id, error = %error, "stale connection delete failed");
        }
    }
}
