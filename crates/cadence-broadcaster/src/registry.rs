//! In-process registry of the connections this node owns.
//!
//! The store holds the durable connection rows; the registry holds what
//! cannot live in a store: the outbound channel to each socket task, the
//! rolling latency window, and the last emitted classification. Every
//! mutable field is owned by exactly one map entry behind one lock, so
//! racing writers (ping handler, tick loop, latency sweep) serialize on
//! tiny critical sections and the kick decision is settled exactly once.

use std::collections::HashMap;
use std::sync::Arc;

use cadence_types::{ConnectionId, ConnectionStatus, LatencyStatus, ServerMessage, SessionId};
use tokio::sync::{mpsc, RwLock};

use crate::latency::{LatencySummary, LatencyThresholds, LatencyWindow};

/// Capacity of the per-connection outbound channel.
///
/// The channel is the send buffer of §-backpressure: a peer that has not
/// drained this many messages has blocked past the send tolerance and is
/// treated as gone.
pub const OUTBOUND_CAPACITY: usize = 32;

/// One frame queued for a socket task.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// A JSON message to deliver.
    Message(ServerMessage),
    /// Instruct the socket task to send a close frame and exit.
    Close,
}

/// Result of attempting to queue a message for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Queued for delivery.
    Delivered,
    /// The transport is gone: channel closed or buffer exhausted.
    Gone,
    /// This node does not own the connection (no registry entry).
    Missing,
}

/// Registry entry for one locally-owned connection.
struct ConnectionEntry {
    outbound: mpsc::Sender<Outbound>,
    session_id: Option<SessionId>,
    status: ConnectionStatus,
    window: LatencyWindow,
    last_classification: Option<LatencyStatus>,
}

/// Shared handle to the connection registry. Cheap to clone.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<HashMap<ConnectionId, ConnectionEntry>>>,
}

/// Snapshot of a window update, handed back to the caller for the store
/// write and for classification.
#[derive(Debug, Clone)]
pub struct SampleSnapshot {
    /// The window contents after the new sample, oldest first.
    pub history: Vec<u64>,
    /// Rounded mean.
    pub avg_latency_ms: u64,
    /// Rounded population standard deviation.
    pub jitter_ms: u64,
    /// Whether the window now holds enough samples to classify.
    pub is_full: bool,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly opened connection and its outbound channel.
    pub async fn register(
        &self,
        id: ConnectionId,
        outbound: mpsc::Sender<Outbound>,
        sample_capacity: usize,
    ) {
        let mut inner = self.inner.write().await;
        inner.insert(
            id,
            ConnectionEntry {
                outbound,
                session_id: None,
                status: ConnectionStatus::Connecting,
                window: LatencyWindow::new(sample_capacity),
                last_classification: None,
            },
        );
    }

    /// Drop a connection from the registry.
    pub async fn remove(&self, id: ConnectionId) {
        let mut inner = self.inner.write().await;
        inner.remove(&id);
    }

    /// Number of locally-owned connections.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Whether this node owns the connection.
    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.inner.read().await.contains_key(&id)
    }

    /// Current local status, if owned.
    pub async fn status(&self, id: ConnectionId) -> Option<ConnectionStatus> {
        self.inner.read().await.get(&id).map(|e| e.status)
    }

    /// The session the connection is bound to, if owned and bound.
    pub async fn session_of(&self, id: ConnectionId) -> Option<SessionId> {
        self.inner.read().await.get(&id).and_then(|e| e.session_id)
    }

    /// Queue a message for delivery.
    ///
    /// A full buffer counts as a gone transport: the peer has stopped
    /// draining past the send tolerance. Kicked and disconnected entries
    /// refuse delivery outright, closing the window between a kick
    /// decision and the store write becoming visible.
    pub async fn send(&self, id: ConnectionId, message: ServerMessage) -> SendOutcome {
        let inner = self.inner.read().await;
        let Some(entry) = inner.get(&id) else {
            return SendOutcome::Missing;
        };
        if entry.status.is_terminal() && !matches!(message, ServerMessage::Kicked { .. }) {
            return SendOutcome::Gone;
        }
        match entry.outbound.try_send(Outbound::Message(message)) {
            Ok(()) => SendOutcome::Delivered,
            Err(_full_or_closed) => SendOutcome::Gone,
        }
    }

    /// Ask the socket task to close the transport. Best-effort; if the
    /// buffer is full the task is already on its way out.
    pub async fn close(&self, id: ConnectionId) {
        let inner = self.inner.read().await;
        if let Some(entry) = inner.get(&id) {
            let _ = entry.outbound.try_send(Outbound::Close);
        }
    }

    /// Bind the connection to a session and move it to `ready`.
    ///
    /// Returns `false` if the connection is not owned or not in
    /// `connecting` state.
    pub async fn bind(&self, id: ConnectionId, session_id: SessionId) -> bool {
        let mut inner = self.inner.write().await;
        let Some(entry) = inner.get_mut(&id) else {
            return false;
        };
        if entry.status != ConnectionStatus::Connecting {
            return false;
        }
        entry.session_id = Some(session_id);
        entry.status = ConnectionStatus::Ready;
        true
    }

    /// Move a `ready` connection to `playing` after its first delivered
    /// tick. Returns `true` only for the transition that actually flipped.
    pub async fn note_playing(&self, id: ConnectionId) -> bool {
        let mut inner = self.inner.write().await;
        let Some(entry) = inner.get_mut(&id) else {
            return false;
        };
        if entry.status == ConnectionStatus::Ready {
            entry.status = ConnectionStatus::Playing;
            true
        } else {
            false
        }
    }

    /// Record a round-trip sample for the connection.
    ///
    /// Returns the updated window snapshot, or `None` if the connection
    /// is not owned or already terminal.
    pub async fn record_sample(&self, id: ConnectionId, rtt_ms: u64) -> Option<SampleSnapshot> {
        let mut inner = self.inner.write().await;
        let entry = inner.get_mut(&id)?;
        if entry.status.is_terminal() {
            return None;
        }
        entry.window.record(rtt_ms);
        Some(SampleSnapshot {
            history: entry.window.samples(),
            avg_latency_ms: entry.window.avg_ms(),
            jitter_ms: entry.window.jitter_ms(),
            is_full: entry.window.is_full(),
        })
    }

    /// Classify the connection's current window against `thresholds`.
    ///
    /// Returns `None` if the connection is not owned, is not in a
    /// broadcast-eligible state, or has not filled its window yet.
    pub async fn latency_summary(
        &self,
        id: ConnectionId,
        thresholds: &LatencyThresholds,
    ) -> Option<LatencySummary> {
        let inner = self.inner.read().await;
        let entry = inner.get(&id)?;
        if !entry.status.is_broadcast_eligible() {
            return None;
        }
        entry.window.classify(thresholds)
    }

    /// Settle the kick race: move the connection to `kicked` if it is
    /// still eligible. Exactly one caller observes `true`, and only that
    /// caller emits the `kicked` message and closes the transport.
    pub async fn begin_kick(&self, id: ConnectionId) -> bool {
        let mut inner = self.inner.write().await;
        let Some(entry) = inner.get_mut(&id) else {
            return false;
        };
        if entry.status.is_broadcast_eligible() {
            entry.status = ConnectionStatus::Kicked;
            true
        } else {
            false
        }
    }

    /// Update the last emitted classification.
    ///
    /// Returns `Some(previous)` only when the classification actually
    /// changed; `None` means the caller must not emit (unchanged, or the
    /// connection is not owned).
    pub async fn update_classification(
        &self,
        id: ConnectionId,
        status: LatencyStatus,
    ) -> Option<Option<LatencyStatus>> {
        let mut inner = self.inner.write().await;
        let entry = inner.get_mut(&id)?;
        if entry.last_classification == Some(status) {
            return None;
        }
        let previous = entry.last_classification;
        entry.last_classification = Some(status);
        Some(previous)
    }

    /// IDs of every locally-owned connection.
    pub async fn local_ids(&self) -> Vec<ConnectionId> {
        self.inner.read().await.keys().copied().collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn thresholds() -> LatencyThresholds {
        LatencyThresholds {
            max_latency_ms: 150,
            max_jitter_ms: 50,
            warning_latency_ms: 100,
            warning_jitter_ms: 30,
            sample_count: 5,
        }
    }

    async fn registered() -> (ConnectionRegistry, ConnectionId, mpsc::Receiver<Outbound>) {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        registry.register(id, tx, 5).await;
        (registry, id, rx)
    }

    #[tokio::test]
    async fn send_to_unknown_connection_is_missing() {
        let registry = ConnectionRegistry::new();
        let outcome = registry
            .send(
                ConnectionId::new(),
                ServerMessage::Countdown {
                    remaining_ms: 1000,
                    start_at: 0,
                },
            )
            .await;
        assert_eq!(outcome, SendOutcome::Missing);
    }

    #[tokio::test]
    async fn send_after_receiver_dropped_is_gone() {
        let (registry, id, rx) = registered().await;
        drop(rx);
        let outcome = registry
            .send(
                id,
                ServerMessage::Countdown {
                    remaining_ms: 1000,
                    start_at: 0,
                },
            )
            .await;
        assert_eq!(outcome, SendOutcome::Gone);
    }

    #[tokio::test]
    async fn full_buffer_counts_as_gone() {
        let (registry, id, _rx) = registered().await;
        for _ in 0..OUTBOUND_CAPACITY {
            let outcome = registry
                .send(
                    id,
                    ServerMessage::Countdown {
                        remaining_ms: 1,
                        start_at: 0,
                    },
                )
                .await;
            assert_eq!(outcome, SendOutcome::Delivered);
        }
        let outcome = registry
            .send(
                id,
                ServerMessage::Countdown {
                    remaining_ms: 1,
                    start_at: 0,
                },
            )
            .await;
        assert_eq!(outcome, SendOutcome::Gone);
    }

    #[tokio::test]
    async fn bind_only_succeeds_once() {
        let (registry, id, _rx) = registered().await;
        let session = SessionId::new();
        assert!(registry.bind(id, session).await);
        assert!(!registry.bind(id, session).await);
        assert_eq!(registry.status(id).await, Some(ConnectionStatus::Ready));
        assert_eq!(registry.session_of(id).await, Some(session));
    }

    #[tokio::test]
    async fn note_playing_flips_exactly_once() {
        let (registry, id, _rx) = registered().await;
        registry.bind(id, SessionId::new()).await;
        assert!(registry.note_playing(id).await);
        assert!(!registry.note_playing(id).await);
        assert_eq!(registry.status(id).await, Some(ConnectionStatus::Playing));
    }

    #[tokio::test]
    async fn kick_race_has_a_single_winner() {
        let (registry, id, _rx) = registered().await;
        registry.bind(id, SessionId::new()).await;
        assert!(registry.begin_kick(id).await);
        assert!(!registry.begin_kick(id).await);
        assert_eq!(registry.status(id).await, Some(ConnectionStatus::Kicked));
    }

    #[tokio::test]
    async fn classification_changes_report_previous_value() {
        let (registry, id, _rx) = registered().await;
        registry.bind(id, SessionId::new()).await;

        assert_eq!(
            registry
                .update_classification(id, LatencyStatus::Warning)
                .await,
            Some(None)
        );
        // Unchanged: no emission.
        assert_eq!(
            registry
                .update_classification(id, LatencyStatus::Warning)
                .await,
            None
        );
        assert_eq!(
            registry.update_classification(id, LatencyStatus::Ok).await,
            Some(Some(LatencyStatus::Warning))
        );
    }

    #[tokio::test]
    async fn summary_requires_full_window_and_eligibility() {
        let (registry, id, _rx) = registered().await;
        let t = thresholds();

        // Not bound yet: connecting is not broadcast-eligible.
        registry.record_sample(id, 20).await.unwrap();
        assert!(registry.latency_summary(id, &t).await.is_none());

        registry.bind(id, SessionId::new()).await;
        for _ in 0..3 {
            registry.record_sample(id, 20).await.unwrap();
        }
        // Four samples: still below the window.
        assert!(registry.latency_summary(id, &t).await.is_none());

        let snapshot = registry.record_sample(id, 20).await.unwrap();
        assert!(snapshot.is_full);
        let summary = registry.latency_summary(id, &t).await.unwrap();
        assert_eq!(summary.status, LatencyStatus::Ok);
    }

    #[tokio::test]
    async fn samples_are_ignored_after_kick() {
        let (registry, id, _rx) = registered().await;
        registry.bind(id, SessionId::new()).await;
        registry.begin_kick(id).await;
        assert!(registry.record_sample(id, 20).await.is_none());
    }
}
