//! Duplex-channel message schemas.
//!
//! Both directions are text-framed JSON. Inbound messages are tagged by
//! `action`, outbound by `type`; field names are camelCase on the wire.
//! Timestamps are Unix milliseconds; `seed`, `step`, `value`, and `round`
//! are 64-bit integers.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::LatencyStatus;
use crate::ids::SessionId;

/// Machine-readable error codes carried by outbound `error` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The message was malformed or not valid in the current state.
    InvalidRequest,
    /// The referenced session does not exist.
    SessionNotFound,
    /// The server failed to process the message after retries.
    Internal,
}

/// Messages a client may send over the duplex channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(tag = "action", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Bind this connection to a session. Valid only while connecting.
    Join {
        /// The session to join.
        session_id: SessionId,
        /// Opaque principal identifier.
        user_id: String,
    },
    /// Latency probe. Valid in any non-terminal state.
    Ping {
        /// Client-side send instant (epoch ms).
        client_timestamp: i64,
    },
}

/// Messages the server emits over the duplex channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Acknowledges a successful `join`.
    SessionJoined {
        session_id: SessionId,
        seed: i64,
        start_at: i64,
        tick_ms: i64,
        region: String,
        ws_endpoint: String,
    },
    /// Emitted while the session is waiting for its start instant.
    Countdown { remaining_ms: i64, start_at: i64 },
    /// One engine state broadcast.
    Tick {
        step: i64,
        value: i64,
        round: i64,
        broken: bool,
        server_timestamp: i64,
    },
    /// Reply to a `ping`, echoing the client timestamp.
    Pong {
        client_timestamp: i64,
        server_timestamp: i64,
    },
    /// Latency classification changed. Sent at most once per transition.
    LatencyStatus {
        avg_latency: u64,
        jitter: u64,
        status: LatencyStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// The connection breached a hard latency bound and is being closed.
    Kicked {
        reason: String,
        avg_latency: u64,
        jitter: u64,
        max_latency: u64,
        max_jitter: u64,
    },
    /// A request-level failure on this connection.
    Error { code: ErrorCode, message: String },
}
