//! HTTP server lifecycle management.
//!
//! Provides [`start_server`], which binds the configured address and runs
//! the Axum server until the shutdown signal flips. Graceful shutdown
//! stops accepting connections and lets in-flight requests drain; open
//! WebSockets end when their socket tasks observe the closed channels.

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::router::build_router;
use crate::state::AppState;

/// Errors that can occur when starting or running the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to the network address.
    #[error("bind error: {0}")]
    Bind(String),

    /// The server encountered a fatal error while serving.
    #[error("serve error: {0}")]
    Serve(String),
}

/// Start the broadcaster HTTP server.
///
/// Binds to the configured address, builds the router, and serves
/// requests until `shutdown` flips to `true`. Returns `Ok(())` on clean
/// shutdown.
///
/// # Errors
///
/// Returns [`ServerError::Bind`] if the TCP listener cannot bind, or
/// [`ServerError::Serve`] on a fatal I/O error.
pub async fn start_server(
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ServerError> {
    let addr: SocketAddr = state
        .config
        .server
        .bind_address()
        .parse()
        .map_err(|e| ServerError::Bind(format!("invalid address: {e}")))?;

    let router = build_router(state);

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::Bind(format!("bind failed on {addr}: {e}")))?;

    info!(%addr, "broadcaster listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            // Wait until shutdown is signalled (or the sender is gone).
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .map_err(|e| ServerError::Serve(format!("serve error: {e}")))?;

    Ok(())
}
