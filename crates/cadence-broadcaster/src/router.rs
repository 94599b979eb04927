//! Axum router construction for the broadcaster node.
//!
//! Assembles the REST routes and the `WebSocket` duplex channel into a
//! single [`Router`] with CORS and request tracing enabled.

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Build the complete Axum router for a broadcaster node.
///
/// The router includes:
/// - `POST /sessions` -- create a session
/// - `GET /sessions/{id}` -- session snapshot
/// - `GET /sessions/{id}/state` -- engine state at request time
/// - `POST /sessions/{id}/stop` -- stop a session
/// - `GET /ws` -- duplex channel upgrade
/// - `GET /healthz` -- liveness probe
///
/// CORS is configured to allow any origin for development. In
/// production this should be restricted.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Sessions
        .route("/sessions", post(handlers::create_session))
        .route("/sessions/{id}", get(handlers::get_session))
        .route("/sessions/{id}/state", get(handlers::get_session_state))
        .route("/sessions/{id}/stop", post(handlers::stop_session))
        // Duplex channel
        .route("/ws", get(ws::ws_connect))
        // Health
        .route("/healthz", get(handlers::healthz))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
