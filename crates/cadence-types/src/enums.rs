//! Status and classification enumerations shared across the workspace.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ---------------------------------------------------------------------------
// Session lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle state of a session.
///
/// The lifecycle is monotone: `Waiting -> Running -> Stopped`. `Stopped`
/// is terminal; a stopped session is never ticked again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Created but not yet started; clients receive countdown messages.
    Waiting,
    /// Ticking; clients receive tick messages.
    Running,
    /// Terminal. No further ticks.
    Stopped,
}

impl SessionStatus {
    /// Whether a session in this state should appear in active listings.
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Waiting | Self::Running)
    }

    /// Whether the monotone lifecycle permits moving to `next`.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Waiting, Self::Running)
                | (Self::Waiting, Self::Stopped)
                | (Self::Running, Self::Stopped)
        )
    }
}

// ---------------------------------------------------------------------------
// Connection lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle state of a player connection.
///
/// `Connecting -> Ready -> Playing -> (Kicked | Disconnected)`. The two
/// end states are terminal. `Ready` and `Playing` are behaviorally
/// identical for broadcast eligibility; the split is visible only in
/// observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Transport open, no `join` received yet.
    Connecting,
    /// Joined to a session, no tick delivered yet.
    Ready,
    /// At least one tick delivered.
    Playing,
    /// Removed for a latency breach. Terminal.
    Kicked,
    /// Transport closed or reaped. Terminal.
    Disconnected,
}

impl ConnectionStatus {
    /// Whether this state can never be left again.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Kicked | Self::Disconnected)
    }

    /// Whether a connection in this state may receive broadcasts.
    ///
    /// Eligibility additionally requires a bound session; see
    /// [`Connection::is_broadcast_eligible`](crate::records::Connection::is_broadcast_eligible).
    pub const fn is_broadcast_eligible(self) -> bool {
        matches!(self, Self::Ready | Self::Playing)
    }

    /// Whether the connection lifecycle permits moving to `next`.
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Connecting, Self::Ready) | (Self::Ready, Self::Playing) => true,
            (from, Self::Kicked | Self::Disconnected) => !from.is_terminal(),
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Latency classification
// ---------------------------------------------------------------------------

/// Quality classification of a connection's rolling latency window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "lowercase")]
pub enum LatencyStatus {
    /// Both average latency and jitter are within the warning bounds.
    Ok,
    /// Average latency or jitter exceeds the warning bound.
    Warning,
    /// Average latency or jitter exceeds the hard bound; the connection
    /// is kicked.
    Critical,
}
