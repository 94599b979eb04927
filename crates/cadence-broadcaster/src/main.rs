//! Broadcaster node binary.
//!
//! # Startup Sequence
//!
//! 1. Initialize structured logging (tracing)
//! 2. Load configuration (`cadence.yaml` if present, environment always)
//! 3. Connect the store backend
//! 4. Spawn the tick loop, latency sweeper, and stale reaper
//! 5. Serve HTTP + WebSocket until SIGINT/SIGTERM
//! 6. Signal shutdown and drain the loops

use std::path::Path;

use cadence_broadcaster::state::AppState;
use cadence_broadcaster::{
    run_latency_sweeper, run_stale_reaper, run_tick_loop, start_server, BroadcasterConfig,
};
use cadence_store::Store;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Default configuration file path, overridable via `CADENCE_CONFIG`.
const DEFAULT_CONFIG_PATH: &str = "cadence.yaml";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("cadence-broadcaster starting");

    // 2. Load configuration.
    let config_path =
        std::env::var("CADENCE_CONFIG").unwrap_or_else(|_| String::from(DEFAULT_CONFIG_PATH));
    let config = if Path::new(&config_path).exists() {
        BroadcasterConfig::from_file(Path::new(&config_path))?
    } else {
        BroadcasterConfig::from_env()
    };
    info!(
        region = config.server.region,
        bind = config.server.bind_address(),
        store_backend = config.store.backend,
        default_tick_ms = config.session.default_tick_ms,
        "configuration loaded"
    );

    // 3. Connect the store backend.
    let store = match config.store.backend.as_str() {
        "redis" => {
            Store::redis(
                &config.store.redis_url,
                config.session.session_ttl_seconds,
                config.session.connection_ttl_seconds,
            )
            .await?
        }
        "memory" => Store::memory(),
        other => {
            return Err(format!("unknown store backend: {other}").into());
        }
    };

    let state = AppState::new(config, store);

    // 4. Spawn the background loops.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let tick_handle = tokio::spawn(run_tick_loop(state.clone(), shutdown_rx.clone()));
    let sweep_handle = tokio::spawn(run_latency_sweeper(state.clone(), shutdown_rx.clone()));
    let reap_handle = tokio::spawn(run_stale_reaper(state.clone(), shutdown_rx.clone()));

    // 5. Serve until a termination signal arrives.
    let server_state = state.clone();
    let server_shutdown = shutdown_rx.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_state, server_shutdown).await {
            error!(error = %e, "server exited with error");
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    // 6. Drain: loops finish their in-flight pass, the server stops
    //    accepting and open sockets wind down.
    let _ = shutdown_tx.send(true);
    for handle in [tick_handle, sweep_handle, reap_handle, server_handle] {
        let _ = handle.await;
    }

    info!("broadcaster exited");
    Ok(())
}
