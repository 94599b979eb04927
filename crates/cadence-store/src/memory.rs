//! In-memory store backend.
//!
//! Backs single-node deployments and the test suites. Handles are cheap
//! clones sharing one map, so several components (or two broadcaster
//! instances in a test) observe the same rows -- within one process the
//! backend is trivially read-your-writes.
//!
//! TTL expiry is enforced on read: expired rows are invisible to `get`
//! and the listing operations, matching the garbage-collection-only role
//! TTLs play in the contract.

use std::collections::HashMap;
use std::sync::Arc;

use cadence_types::{Connection, ConnectionId, Session, SessionId, SessionStatus};
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::StoreError;

#[derive(Default)]
struct MemoryInner {
    sessions: HashMap<SessionId, Session>,
    connections: HashMap<ConnectionId, Connection>,
}

/// In-memory implementation of the store contract.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<MemoryInner>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    // -----------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------

    pub(crate) async fn create_session(&self, session: &Session) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner.sessions.contains_key(&session.session_id) {
            return Err(StoreError::AlreadyExists(format!(
                "session {}",
                session.session_id
            )));
        }
        inner.sessions.insert(session.session_id, session.clone());
        Ok(())
    }

    pub(crate) async fn get_session(&self, id: SessionId) -> Result<Session, StoreError> {
        let inner = self.inner.read().await;
        inner
            .sessions
            .get(&id)
            .filter(|s| !s.is_expired(Self::now_ms()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("session {id}")))
    }

    pub(crate) async fn update_session_status(
        &self,
        id: SessionId,
        status: SessionStatus,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let session = inner
            .sessions
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("session {id}")))?;
        if !session.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                entity: format!("session {id}"),
                from: format!("{:?}", session.status),
                to: format!("{status:?}"),
            });
        }
        session.status = status;
        Ok(())
    }

    pub(crate) async fn update_session_state(
        &self,
        id: SessionId,
        step: i64,
        value: i64,
        round: i64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let session = inner
            .sessions
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("session {id}")))?;
        session.current_step = Some(step);
        session.current_value = Some(value);
        session.current_round = Some(round);
        Ok(())
    }

    pub(crate) async fn list_active_sessions(&self) -> Result<Vec<Session>, StoreError> {
        let now = Self::now_ms();
        let inner = self.inner.read().await;
        Ok(inner
            .sessions
            .values()
            .filter(|s| s.status.is_active() && !s.is_expired(now))
            .cloned()
            .collect())
    }

    // -----------------------------------------------------------------
    // Connections
    // -----------------------------------------------------------------

    pub(crate) async fn create_connection(&self, connection: &Connection) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner.connections.contains_key(&connection.connection_id) {
            return Err(StoreError::AlreadyExists(format!(
                "connection {}",
                connection.connection_id
            )));
        }
        inner
            .connections
            .insert(connection.connection_id, connection.clone());
        Ok(())
    }

    pub(crate) async fn get_connection(&self, id: ConnectionId) -> Result<Connection, StoreError> {
        let inner = self.inner.read().await;
        inner
            .connections
            .get(&id)
            .filter(|c| !c.is_expired(Self::now_ms()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("connection {id}")))
    }

    pub(crate) async fn bind_connection(
        &self,
        id: ConnectionId,
        session_id: SessionId,
        user_id: &str,
        joined_at_ms: i64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let connection = inner
            .connections
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("connection {id}")))?;
        if !connection
            .status
            .can_transition_to(cadence_types::ConnectionStatus::Ready)
        {
            return Err(StoreError::InvalidTransition {
                entity: format!("connection {id}"),
                from: format!("{:?}", connection.status),
                to: String::from("Ready"),
            });
        }
        connection.session_id = Some(session_id);
        connection.user_id = user_id.to_owned();
        connection.status = cadence_types::ConnectionStatus::Ready;
        connection.joined_at_ms = joined_at_ms;
        Ok(())
    }

    pub(crate) async fn update_latency(
        &self,
        id: ConnectionId,
        history: &[u64],
        avg_latency_ms: u64,
        jitter_ms: u64,
        last_ping_at_ms: i64,
        last_pong_at_ms: i64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let connection = inner
            .connections
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("connection {id}")))?;
        connection.latency_history = history.to_vec();
        connection.avg_latency_ms = avg_latency_ms;
        connection.jitter_ms = jitter_ms;
        connection.last_ping_at_ms = last_ping_at_ms;
        connection.last_pong_at_ms = last_pong_at_ms;
        Ok(())
    }

    pub(crate) async fn update_connection_status(
        &self,
        id: ConnectionId,
        status: cadence_types::ConnectionStatus,
        kick_reason: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let connection = inner
            .connections
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("connection {id}")))?;
        if !connection.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                entity: format!("connection {id}"),
                from: format!("{:?}", connection.status),
                to: format!("{status:?}"),
            });
        }
        connection.status = status;
        if let Some(reason) = kick_reason {
            connection.kick_reason = Some(reason.to_owned());
        }
        Ok(())
    }

    pub(crate) async fn delete_connection(&self, id: ConnectionId) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.connections.remove(&id);
        Ok(())
    }

    pub(crate) async fn list_connections_by_session(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<Connection>, StoreError> {
        let now = Self::now_ms();
        let inner = self.inner.read().await;
        Ok(inner
            .connections
            .values()
            .filter(|c| {
                c.session_id == Some(session_id)
                    && c.is_broadcast_eligible()
                    && !c.is_expired(now)
            })
            .cloned()
            .collect())
    }

    pub(crate) async fn list_active_connections(&self) -> Result<Vec<Connection>, StoreError> {
        let now = Self::now_ms();
        let inner = self.inner.read().await;
        Ok(inner
            .connections
            .values()
            .filter(|c| !c.status.is_terminal() && !c.is_expired(now))
            .cloned()
            .collect())
    }
}
