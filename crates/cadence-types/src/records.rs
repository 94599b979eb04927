//! Persistent records for sessions and connections.
//!
//! These are the rows the store persists. All timestamps are Unix
//! milliseconds so the values round-trip bit-exactly between the store,
//! the engine, and the wire.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::{ConnectionStatus, SessionStatus};
use crate::ids::{ConnectionId, SessionId};

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A game session row.
///
/// `seed`, `start_at_ms`, and `tick_ms` are immutable once written: the
/// authoritative game state is always recomputed from them, never read
/// back from the cached `current_*` fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Session {
    /// Unique session identifier.
    pub session_id: SessionId,
    /// PRNG seed determining the break pattern.
    pub seed: i64,
    /// Wall-clock instant (epoch ms) at which ticking begins.
    pub start_at_ms: i64,
    /// Tick period in milliseconds. Strictly positive.
    pub tick_ms: i64,
    /// Lifecycle state. Monotone `waiting -> running -> stopped`.
    pub status: SessionStatus,
    /// Region of the broadcaster that owns (created) the session.
    pub region: String,
    /// Creation instant (epoch ms).
    pub created_at_ms: i64,
    /// Absolute expiry instant (epoch ms). Always after `created_at_ms`.
    pub expires_at_ms: i64,
    /// Cached engine step, written best-effort for observability.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<i64>,
    /// Cached engine value, written best-effort for observability.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_value: Option<i64>,
    /// Cached engine round, written best-effort for observability.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_round: Option<i64>,
}

impl Session {
    /// Whether the row has expired at `now_ms`.
    pub const fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// A player connection row.
///
/// The rolling latency window is capped by the configured sample count;
/// `avg_latency_ms` and `jitter_ms` are derived from it on each update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Connection {
    /// Identifier assigned when the transport opened.
    pub connection_id: ConnectionId,
    /// Bound session. `None` until a valid `join`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// Opaque principal identifier supplied by `join`. Empty until bound.
    pub user_id: String,
    /// Region of the broadcaster that owns the transport.
    pub region: String,
    /// Lifecycle state.
    pub status: ConnectionStatus,
    /// Recent round-trip samples (ms), oldest first.
    pub latency_history: Vec<u64>,
    /// Rounded mean of `latency_history`.
    pub avg_latency_ms: u64,
    /// Rounded population standard deviation of `latency_history`.
    pub jitter_ms: u64,
    /// Instant the connection was bound to a session (epoch ms).
    pub joined_at_ms: i64,
    /// Instant of the last received ping (epoch ms).
    pub last_ping_at_ms: i64,
    /// Instant of the last emitted pong (epoch ms).
    pub last_pong_at_ms: i64,
    /// Absolute expiry instant (epoch ms).
    pub expires_at_ms: i64,
    /// Which bound was breached, when `status` is `kicked`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kick_reason: Option<String>,
}

impl Connection {
    /// Whether this connection may receive broadcasts: non-terminal
    /// `ready`/`playing` state and a bound session.
    pub fn is_broadcast_eligible(&self) -> bool {
        self.status.is_broadcast_eligible() && self.session_id.is_some()
    }

    /// The staleness reference instant: the later of the last ping and
    /// the join.
    pub fn last_activity_ms(&self) -> i64 {
        self.last_ping_at_ms.max(self.joined_at_ms)
    }

    /// Whether the row has expired at `now_ms`.
    pub const fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at_ms
    }
}
