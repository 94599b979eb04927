//! The tick broadcast loop.
//!
//! One cooperative loop per node drives every active session: it keeps a
//! cached session list (this loop is the cache's single writer), computes
//! engine state from wall clock, and fans frames out to the eligible
//! connections. Errors below an invariant breach never stop the loop --
//! a failing session or connection is skipped for the pass and picked up
//! again on the next one.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use cadence_types::{ConnectionId, ServerMessage, Session, SessionId, SessionStatus};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::registry::SendOutcome;
use crate::state::{now_ms, AppState};

/// Floor on the dispatcher sleep, preventing a tight loop.
const MIN_SLEEP: Duration = Duration::from_millis(10);

/// Ceiling on the dispatcher sleep, bounding the latency to newly added
/// sessions and to shutdown.
const MAX_SLEEP: Duration = Duration::from_millis(100);

/// Tick-loop state: the session cache and per-session emission cursor.
pub struct TickLoop {
    state: AppState,
    cache: HashMap<SessionId, Session>,
    last_emitted: HashMap<SessionId, i64>,
    last_refresh: Option<Instant>,
}

impl TickLoop {
    /// Create a loop with an empty cache.
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            cache: HashMap::new(),
            last_emitted: HashMap::new(),
            last_refresh: None,
        }
    }

    /// Number of sessions currently cached.
    pub fn cached_sessions(&self) -> usize {
        self.cache.len()
    }

    /// Refresh the session cache from the store unconditionally.
    ///
    /// A store failure keeps the previous cache: ticking from a slightly
    /// stale list beats not ticking at all.
    pub async fn refresh(&mut self) {
        match self.state.store.list_active_sessions().await {
            Ok(sessions) => {
                self.cache = sessions
                    .into_iter()
                    .map(|s| (s.session_id, s))
                    .collect();
                self.last_emitted
                    .retain(|session_id, _| self.cache.contains_key(session_id));
                self.last_refresh = Some(Instant::now());
                debug!(sessions = self.cache.len(), "session cache refreshed");
            }
            Err(error) => {
                warn!(error = %error, "session list refresh failed, keeping cached view");
                self.last_refresh = Some(Instant::now());
            }
        }
    }

    /// Refresh only if the cache is older than the refresh interval.
    pub async fn refresh_if_stale(&mut self) {
        let interval = Duration::from_millis(self.state.config.session.refresh_interval_ms);
        let stale = self
            .last_refresh
            .is_none_or(|at| at.elapsed() >= interval);
        if stale {
            self.refresh().await;
        }
    }

    /// Run one pass over every cached session at wall-clock `now`.
    pub async fn run_pass(&mut self, now: i64) {
        let session_ids: Vec<SessionId> = self.cache.keys().copied().collect();
        for session_id in session_ids {
            if let Some(session) = self.cache.get(&session_id).cloned() {
                self.tick_session(session, now).await;
            }
        }
    }

    /// Drive one session through one cycle: lifecycle transition, then
    /// countdown or tick emission.
    async fn tick_session(&mut self, mut session: Session, now: i64) {
        let session_id = session.session_id;

        let connections = match self
            .state
            .store
            .list_connections_by_session(session_id)
            .await
        {
            Ok(connections) => connections,
            Err(error) => {
                // Skip this session for the pass; the next pass retries.
                warn!(session_id = %session_id, error = %error,
                    "connection listing failed, skipping session this pass");
                return;
            }
        };
        if connections.is_empty() {
            return;
        }
        let connection_ids: Vec<ConnectionId> =
            connections.iter().map(|c| c.connection_id).collect();

        if session.status == SessionStatus::Waiting && now >= session.start_at_ms {
            match self
                .state
                .store
                .update_session_status(session_id, SessionStatus::Running)
                .await
            {
                Ok(()) => info!(session_id = %session_id, "session started"),
                Err(error) => {
                    // Optimistically advance the cached copy; the store
                    // write retries next pass and the refresh re-aligns
                    // if the store disagrees.
                    warn!(session_id = %session_id, error = %error,
                        "start transition write failed, advancing cached copy");
                }
            }
            session.status = SessionStatus::Running;
            self.cache.insert(session_id, session.clone());
        }

        if session.status == SessionStatus::Waiting {
            let message = ServerMessage::Countdown {
                remaining_ms: session.start_at_ms - now,
                start_at: session.start_at_ms,
            };
            let outcome = self.fan_out(&connection_ids, &message).await;
            self.reap(session_id, outcome.gone).await;
            return;
        }

        let state = cadence_engine::state_at(session.seed, session.start_at_ms, session.tick_ms, now);

        // Emit each step at most once. After a stall only the latest
        // step goes out; the engine is pure, so nothing is lost.
        if self.last_emitted.get(&session_id) == Some(&state.step) {
            return;
        }

        // Cached-state write is informational; failure never blocks the tick.
        if let Err(error) = self
            .state
            .store
            .update_session_state(session_id, state.step, state.value, state.round)
            .await
        {
            debug!(session_id = %session_id, error = %error, "cached state write failed");
        }

        let message = ServerMessage::Tick {
            step: state.step,
            value: state.value,
            round: state.round,
            broken: state.broken,
            server_timestamp: now,
        };
        let outcome = self.fan_out(&connection_ids, &message).await;

        // First delivered tick moves a ready connection to playing.
        for connection_id in &outcome.delivered {
            if self.state.registry.note_playing(*connection_id).await {
                if let Err(error) = self
                    .state
                    .store
                    .update_connection_status(
                        *connection_id,
                        cadence_types::ConnectionStatus::Playing,
                        None,
                    )
                    .await
                {
                    debug!(connection_id = %connection_id, error = %error,
                        "playing status write failed");
                }
            }
        }

        self.reap(session_id, outcome.gone).await;
        self.last_emitted.insert(session_id, state.step);
    }

    /// Queue `message` for every connection, partitioning the results.
    async fn fan_out(
        &self,
        connection_ids: &[ConnectionId],
        message: &ServerMessage,
    ) -> FanOutOutcome {
        let mut outcome = FanOutOutcome::default();
        for &connection_id in connection_ids {
            match self.state.registry.send(connection_id, message.clone()).await {
                SendOutcome::Delivered => outcome.delivered.push(connection_id),
                SendOutcome::Gone => outcome.gone.push(connection_id),
                // Owned by another node in the region; its loop delivers.
                SendOutcome::Missing => {}
            }
        }
        outcome
    }

    /// Remove connections whose transport reported gone.
    async fn reap(&self, session_id: SessionId, gone: Vec<ConnectionId>) {
        for connection_id in gone {
            info!(session_id = %session_id, connection_id = %connection_id,
                "reaping gone connection");
            self.state.registry.remove(connection_id).await;
            if let Err(error) = self.state.store.delete_connection(connection_id).await {
                warn!(connection_id = %connection_id, error = %error,
                    "gone connection delete failed");
            }
        }
    }

    /// Dispatcher sleep until the next interesting instant, clamped to
    /// `[10ms, 100ms]`.
    pub fn next_sleep(&self, now: i64) -> Duration {
        let mut until_next: Option<i64> = None;
        for session in self.cache.values() {
            let ms = if session.status == SessionStatus::Waiting && now < session.start_at_ms {
                session.start_at_ms - now
            } else {
                let elapsed = (now - session.start_at_ms).max(0);
                session.tick_ms - (elapsed % session.tick_ms)
            };
            until_next = Some(until_next.map_or(ms, |cur| cur.min(ms)));
        }

        let ms = until_next
            .unwrap_or(MAX_SLEEP.as_millis() as i64)
            .clamp(MIN_SLEEP.as_millis() as i64, MAX_SLEEP.as_millis() as i64);
        Duration::from_millis(ms as u64)
    }
}

/// Run the tick loop until shutdown is signalled.
///
/// With no active sessions the loop idles on the longer poll interval;
/// otherwise it passes over every session and sleeps until the next
/// tick target.
pub async fn run_tick_loop(state: AppState, mut shutdown: watch::Receiver<bool>) {
    let idle_sleep = Duration::from_millis(state.config.session.idle_poll_ms.max(1000));
    let mut tick_loop = TickLoop::new(state);
    info!("tick loop starting");

    while !*shutdown.borrow() {
        tick_loop.refresh_if_stale().await;

        if tick_loop.cached_sessions() == 0 {
            tokio::select! {
                _ = shutdown.changed() => {}
                () = tokio::time::sleep(idle_sleep) => {}
            }
            continue;
        }

        tick_loop.run_pass(now_ms()).await;

        let delay = tick_loop.next_sleep(now_ms());
        tokio::select! {
            _ = shutdown.changed() => {}
            () = tokio::time::sleep(delay) => {}
        }
    }

    info!("tick loop stopped");
}

/// Connection IDs partitioned by fan-out result.
#[derive(Default)]
struct FanOutOutcome {
    delivered: Vec<ConnectionId>,
    gone: Vec<ConnectionId>,
}
