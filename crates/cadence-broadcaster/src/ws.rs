//! WebSocket handler for the duplex channel.
//!
//! Clients connect to `GET /ws`, send `join` to bind to a session, and
//! from then on receive countdown/tick frames pushed by the tick loop
//! plus pong/latency frames from the connection manager. The socket task
//! here is the only code touching the raw socket; everything else
//! communicates through the per-connection outbound channel, which keeps
//! each connection's frames in order.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use cadence_types::{ClientMessage, ConnectionId, ErrorCode, ServerMessage};
use tracing::{debug, warn};

use crate::connection;
use crate::registry::Outbound;
use crate::state::AppState;

/// Upgrade an HTTP request to a `WebSocket` connection.
///
/// # Route
///
/// `GET /ws`
pub async fn ws_connect(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Drive one connection's socket until either side closes it.
async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let (connection_id, mut outbound) = match connection::open(&state).await {
        Ok(opened) => opened,
        Err(error) => {
            warn!(error = %error, "rejecting connection: row create failed");
            return;
        }
    };

    loop {
        tokio::select! {
            // Frames queued by the tick loop and connection manager.
            queued = outbound.recv() => {
                match queued {
                    Some(Outbound::Message(message)) => {
                        if send_frame(&mut socket, &message).await.is_err() {
                            debug!(connection_id = %connection_id, "client gone (send failed)");
                            break;
                        }
                    }
                    Some(Outbound::Close) => {
                        let _ = socket.send(Message::Close(None)).await;
                        break;
                    }
                    None => break,
                }
            }
            // Frames arriving from the client.
            received = socket.recv() => {
                match received {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(message) => {
                                connection::handle_message(&state, connection_id, message).await;
                            }
                            Err(error) => {
                                debug!(connection_id = %connection_id, error = %error,
                                    "unparseable client message");
                                send_parse_error(&state, connection_id).await;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(connection_id = %connection_id, "client closed");
                        break;
                    }
                    Some(Err(error)) => {
                        debug!(connection_id = %connection_id, error = %error, "socket error");
                        break;
                    }
                    // Binary and unsolicited pong frames are ignored.
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    connection::finalize_disconnect(&state, connection_id).await;
}

/// Serialize and send one outbound message as a text frame.
async fn send_frame(socket: &mut WebSocket, message: &ServerMessage) -> Result<(), axum::Error> {
    let json = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(error) => {
            warn!(error = %error, "failed to serialize outbound message");
            return Ok(());
        }
    };
    socket.send(Message::Text(json.into())).await
}

/// Report a malformed inbound frame through the ordered outbound path.
async fn send_parse_error(state: &AppState, connection_id: ConnectionId) {
    let _ = state
        .registry
        .send(
            connection_id,
            ServerMessage::Error {
                code: ErrorCode::InvalidRequest,
                message: String::from("malformed message"),
            },
        )
        .await;
}
