//! Connection lifecycle management.
//!
//! Owns the per-connection state machine: opening a transport, binding it
//! to a session on `join`, latency sampling on `ping`, and the warn/kick
//! enforcement policy. The WebSocket layer and the background sweep both
//! funnel through [`enforce_latency`], so the "exactly one `kicked`
//! message, at most one `latency_status` per transition" rules hold no
//! matter who observes the breach first.

use cadence_store::{with_retry, StoreError};
use cadence_types::{
    ClientMessage, Connection, ConnectionId, ConnectionStatus, ErrorCode, LatencyStatus,
    ServerMessage, SessionId, SessionStatus,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::latency::LatencySummary;
use crate::registry::{Outbound, OUTBOUND_CAPACITY};
use crate::state::{now_ms, AppState};

/// Open a new connection: persist the row and register the transport.
///
/// Returns the connection ID and the outbound receiver the socket task
/// drains. The row starts in `connecting` with the open instant counted
/// as ping activity, so an idle socket still gets the full staleness
/// grace period before the reaper evicts it.
///
/// # Errors
///
/// Returns the store error if the row cannot be created; the caller
/// closes the raw socket in that case.
pub async fn open(state: &AppState) -> Result<(ConnectionId, mpsc::Receiver<Outbound>), StoreError> {
    let now = now_ms();
    let connection = Connection {
        connection_id: ConnectionId::new(),
        session_id: None,
        user_id: String::new(),
        region: state.config.server.region.clone(),
        status: ConnectionStatus::Connecting,
        latency_history: Vec::new(),
        avg_latency_ms: 0,
        jitter_ms: 0,
        joined_at_ms: 0,
        last_ping_at_ms: now,
        last_pong_at_ms: 0,
        expires_at_ms: now + state.config.session.connection_ttl_seconds * 1000,
        kick_reason: None,
    };

    with_retry("create_connection", state.store_deadline(), || {
        state.store.create_connection(&connection)
    })
    .await?;

    let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
    state
        .registry
        .register(
            connection.connection_id,
            tx,
            state.config.latency.sample_count,
        )
        .await;

    debug!(connection_id = %connection.connection_id, "connection opened");
    Ok((connection.connection_id, rx))
}

/// Dispatch one parsed client message.
pub async fn handle_message(state: &AppState, id: ConnectionId, message: ClientMessage) {
    match message {
        ClientMessage::Join {
            session_id,
            user_id,
        } => handle_join(state, id, session_id, &user_id).await,
        ClientMessage::Ping { client_timestamp } => {
            handle_ping(state, id, client_timestamp).await;
        }
    }
}

/// Bind a connecting connection to a session.
async fn handle_join(state: &AppState, id: ConnectionId, session_id: SessionId, user_id: &str) {
    if state.registry.status(id).await != Some(ConnectionStatus::Connecting) {
        send_error(state, id, ErrorCode::InvalidRequest, "connection already joined").await;
        return;
    }
    if user_id.trim().is_empty() {
        send_error(state, id, ErrorCode::InvalidRequest, "userId is required").await;
        return;
    }

    let session = match with_retry("get_session", state.store_deadline(), || {
        state.store.get_session(session_id)
    })
    .await
    {
        Ok(session) => session,
        Err(StoreError::NotFound(_)) => {
            send_error(state, id, ErrorCode::SessionNotFound, "session not found").await;
            return;
        }
        Err(error) => {
            warn!(connection_id = %id, error = %error, "join failed reading session");
            send_error(state, id, ErrorCode::Internal, "failed to load session").await;
            return;
        }
    };

    if session.status == SessionStatus::Stopped {
        send_error(state, id, ErrorCode::InvalidRequest, "session already stopped").await;
        return;
    }

    let now = now_ms();
    match with_retry("bind_connection", state.store_deadline(), || {
        state.store.bind_connection(id, session_id, user_id, now)
    })
    .await
    {
        Ok(()) => {}
        Err(StoreError::InvalidTransition { .. }) => {
            send_error(state, id, ErrorCode::InvalidRequest, "connection already joined").await;
            return;
        }
        Err(error) => {
            warn!(connection_id = %id, error = %error, "join failed binding connection");
            send_error(state, id, ErrorCode::Internal, "failed to join session").await;
            return;
        }
    }

    state.registry.bind(id, session_id).await;
    info!(connection_id = %id, session_id = %session_id, user_id, "connection joined session");

    let _ = state
        .registry
        .send(
            id,
            ServerMessage::SessionJoined {
                session_id,
                seed: session.seed,
                start_at: session.start_at_ms,
                tick_ms: session.tick_ms,
                region: session.region,
                ws_endpoint: state.config.server.ws_endpoint(),
            },
        )
        .await;
}

/// Record a latency sample, reply with a pong, and enforce thresholds.
async fn handle_ping(state: &AppState, id: ConnectionId, client_timestamp: i64) {
    let Some(status) = state.registry.status(id).await else {
        return;
    };
    if status.is_terminal() {
        return;
    }

    let now = now_ms();
    // Canonical estimator: one-way-plus-skew, clamped non-negative.
    // Monotone in true round-trip time, which is all classification needs.
    let rtt_ms = now.saturating_sub(client_timestamp).max(0) as u64;

    let Some(snapshot) = state.registry.record_sample(id, rtt_ms).await else {
        return;
    };

    let _ = state
        .registry
        .send(
            id,
            ServerMessage::Pong {
                client_timestamp,
                server_timestamp: now,
            },
        )
        .await;

    if let Err(error) = state
        .store
        .update_latency(
            id,
            &snapshot.history,
            snapshot.avg_latency_ms,
            snapshot.jitter_ms,
            now,
            now,
        )
        .await
    {
        // The row may have expired or been reaped; the local window is
        // still authoritative for enforcement.
        debug!(connection_id = %id, error = %error, "latency summary write failed");
    }

    if snapshot.is_full {
        let thresholds = state.config.latency.thresholds();
        if let Some(summary) = state.registry.latency_summary(id, &thresholds).await {
            enforce_latency(state, id, summary).await;
        }
    }
}

/// Apply the warn/kick policy to a classified window.
///
/// Critical windows kick: exactly one `kicked` message (the registry
/// settles the race), then the transport closes. Warning and recovery
/// transitions emit a single `latency_status`.
pub async fn enforce_latency(state: &AppState, id: ConnectionId, summary: LatencySummary) {
    match summary.status {
        LatencyStatus::Critical => {
            if !state.registry.begin_kick(id).await {
                return;
            }
            let thresholds = state.config.latency.thresholds();
            let reason = summary.breach_reason(&thresholds);
            info!(
                connection_id = %id,
                avg_latency_ms = summary.avg_latency_ms,
                jitter_ms = summary.jitter_ms,
                reason,
                "kicking connection"
            );

            // The kicked message must be attempted before the close.
            let _ = state
                .registry
                .send(
                    id,
                    ServerMessage::Kicked {
                        reason: reason.clone(),
                        avg_latency: summary.avg_latency_ms,
                        jitter: summary.jitter_ms,
                        max_latency: thresholds.max_latency_ms,
                        max_jitter: thresholds.max_jitter_ms,
                    },
                )
                .await;
            state.registry.close(id).await;

            if let Err(error) = state
                .store
                .update_connection_status(id, ConnectionStatus::Kicked, Some(&reason))
                .await
            {
                warn!(connection_id = %id, error = %error, "kick status write failed");
            }
        }
        LatencyStatus::Warning | LatencyStatus::Ok => {
            let Some(previous) = state
                .registry
                .update_classification(id, summary.status)
                .await
            else {
                return;
            };
            // The very first classification being ok is the steady state,
            // not a transition worth a message.
            if previous.is_none() && summary.status == LatencyStatus::Ok {
                return;
            }
            let message = (summary.status == LatencyStatus::Warning).then(|| {
                format!(
                    "latency degraded: avg {}ms, jitter {}ms",
                    summary.avg_latency_ms, summary.jitter_ms
                )
            });
            let _ = state
                .registry
                .send(
                    id,
                    ServerMessage::LatencyStatus {
                        avg_latency: summary.avg_latency_ms,
                        jitter: summary.jitter_ms,
                        status: summary.status,
                        message,
                    },
                )
                .await;
        }
    }
}

/// Tear down after the socket task exits: drop the registry entry, mark
/// the row disconnected if it was not already terminal, and delete it.
pub async fn finalize_disconnect(state: &AppState, id: ConnectionId) {
    state.registry.remove(id).await;

    match state
        .store
        .update_connection_status(id, ConnectionStatus::Disconnected, None)
        .await
    {
        // Already kicked, or the row expired underneath us.
        Ok(()) | Err(StoreError::InvalidTransition { .. }) | Err(StoreError::NotFound(_)) => {}
        Err(error) => {
            warn!(connection_id = %id, error = %error, "disconnect status write failed");
        }
    }

    if let Err(error) = state.store.delete_connection(id).await {
        warn!(connection_id = %id, error = %error, "connection row delete failed");
    }
    debug!(connection_id = %id, "connection closed");
}

/// Queue an `error` message for the connection.
async fn send_error(state: &AppState, id: ConnectionId, code: ErrorCode, message: &str) {
    let _ = state
        .registry
        .send(
            id,
            ServerMessage::Error {
                code,
                message: message.to_owned(),
            },
        )
        .await;
}
