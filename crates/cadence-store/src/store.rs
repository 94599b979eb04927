//! The store contract consumed by broadcaster nodes.
//!
//! [`Store`] is the single entry point: every operation the broadcaster,
//! connection manager, and HTTP handlers need, dispatched to the selected
//! backend. The contract the backends must satisfy:
//!
//! - Writes within a node are read-your-writes.
//! - `create_*` rejects identifier collisions with
//!   [`StoreError::AlreadyExists`].
//! - Status updates are conditional: the stored status must permit the
//!   requested transition, otherwise [`StoreError::InvalidTransition`] is
//!   returned and the row is untouched. This serializes racing writers
//!   (ping handler vs tick loop vs latency sweep) without a lock.
//! - TTL expiry is garbage collection only. Listings may briefly return
//!   just-expired rows; callers treat rows that disappear as no-ops.
//! - `list_active_sessions` may lag recent creations by a bounded refresh
//!   interval; the broadcaster tolerates this.

use cadence_types::{Connection, ConnectionId, ConnectionStatus, Session, SessionId, SessionStatus};

use crate::error::StoreError;
use crate::memory::MemoryStore;
use crate::redis::RedisStore;

/// A handle to one of the supported storage backends.
///
/// Cheap to clone; clones share the underlying connection or map.
#[derive(Clone)]
pub enum Store {
    /// Process-local store for single-node deployments and tests.
    Memory(MemoryStore),
    /// Redis-backed store for multi-node regions.
    Redis(RedisStore),
}

impl Store {
    /// Create an in-memory store.
    pub fn memory() -> Self {
        Self::Memory(MemoryStore::new())
    }

    /// Connect to a Redis-backed store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] or [`StoreError::Redis`] if the URL
    /// is invalid or the connection fails.
    pub async fn redis(
        url: &str,
        session_ttl_secs: i64,
        connection_ttl_secs: i64,
    ) -> Result<Self, StoreError> {
        Ok(Self::Redis(
            RedisStore::connect(url, session_ttl_secs, connection_ttl_secs).await?,
        ))
    }

    // -----------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------

    /// Persist a new session row.
    ///
    /// # Errors
    ///
    /// [`StoreError::AlreadyExists`] if the session ID collides.
    pub async fn create_session(&self, session: &Session) -> Result<(), StoreError> {
        match self {
            Self::Memory(store) => store.create_session(session).await,
            Self::Redis(store) => store.create_session(session).await,
        }
    }

    /// Fetch a session row.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if the row is missing or expired.
    pub async fn get_session(&self, id: SessionId) -> Result<Session, StoreError> {
        match self {
            Self::Memory(store) => store.get_session(id).await,
            Self::Redis(store) => store.get_session(id).await,
        }
    }

    /// Transition a session's status. Conditional on the stored status.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if the row is missing,
    /// [`StoreError::InvalidTransition`] if the lifecycle forbids it.
    pub async fn update_session_status(
        &self,
        id: SessionId,
        status: SessionStatus,
    ) -> Result<(), StoreError> {
        match self {
            Self::Memory(store) => store.update_session_status(id, status).await,
            Self::Redis(store) => store.update_session_status(id, status).await,
        }
    }

    /// Write the cached engine state onto the session row.
    ///
    /// Informational only -- the authoritative state is always recomputed.
    /// Callers log and ignore failures.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if the row is missing.
    pub async fn update_session_state(
        &self,
        id: SessionId,
        step: i64,
        value: i64,
        round: i64,
    ) -> Result<(), StoreError> {
        match self {
            Self::Memory(store) => store.update_session_state(id, step, value, round).await,
            Self::Redis(store) => store.update_session_state(id, step, value, round).await,
        }
    }

    /// List every waiting or running session.
    ///
    /// # Errors
    ///
    /// Backend I/O failures only.
    pub async fn list_active_sessions(&self) -> Result<Vec<Session>, StoreError> {
        match self {
            Self::Memory(store) => store.list_active_sessions().await,
            Self::Redis(store) => store.list_active_sessions().await,
        }
    }

    // -----------------------------------------------------------------
    // Connections
    // -----------------------------------------------------------------

    /// Persist a new connection row.
    ///
    /// # Errors
    ///
    /// [`StoreError::AlreadyExists`] if the connection ID collides.
    pub async fn create_connection(&self, connection: &Connection) -> Result<(), StoreError> {
        match self {
            Self::Memory(store) => store.create_connection(connection).await,
            Self::Redis(store) => store.create_connection(connection).await,
        }
    }

    /// Fetch a connection row.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if the row is missing or expired.
    pub async fn get_connection(&self, id: ConnectionId) -> Result<Connection, StoreError> {
        match self {
            Self::Memory(store) => store.get_connection(id).await,
            Self::Redis(store) => store.get_connection(id).await,
        }
    }

    /// Bind a connecting connection to a session (the `join` write):
    /// sets the session, principal, join instant, and `ready` status.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidTransition`] unless the stored status is
    /// still `connecting`.
    pub async fn bind_connection(
        &self,
        id: ConnectionId,
        session_id: SessionId,
        user_id: &str,
        joined_at_ms: i64,
    ) -> Result<(), StoreError> {
        match self {
            Self::Memory(store) => {
                store
                    .bind_connection(id, session_id, user_id, joined_at_ms)
                    .await
            }
            Self::Redis(store) => {
                store
                    .bind_connection(id, session_id, user_id, joined_at_ms)
                    .await
            }
        }
    }

    /// Replace the rolling latency summary on a connection row.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if the row is missing.
    pub async fn update_latency(
        &self,
        id: ConnectionId,
        history: &[u64],
        avg_latency_ms: u64,
        jitter_ms: u64,
        last_ping_at_ms: i64,
        last_pong_at_ms: i64,
    ) -> Result<(), StoreError> {
        match self {
            Self::Memory(store) => {
                store
                    .update_latency(
                        id,
                        history,
                        avg_latency_ms,
                        jitter_ms,
                        last_ping_at_ms,
                        last_pong_at_ms,
                    )
                    .await
            }
            Self::Redis(store) => {
                store
                    .update_latency(
                        id,
                        history,
                        avg_latency_ms,
                        jitter_ms,
                        last_ping_at_ms,
                        last_pong_at_ms,
                    )
                    .await
            }
        }
    }

    /// Transition a connection's status. Conditional on the stored status.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if the row is missing,
    /// [`StoreError::InvalidTransition`] if the lifecycle forbids it.
    pub async fn update_connection_status(
        &self,
        id: ConnectionId,
        status: ConnectionStatus,
        kick_reason: Option<&str>,
    ) -> Result<(), StoreError> {
        match self {
            Self::Memory(store) => {
                store.update_connection_status(id, status, kick_reason).await
            }
            Self::Redis(store) => {
                store.update_connection_status(id, status, kick_reason).await
            }
        }
    }

    /// Remove a connection row. Deleting an absent row is not an error.
    ///
    /// # Errors
    ///
    /// Backend I/O failures only.
    pub async fn delete_connection(&self, id: ConnectionId) -> Result<(), StoreError> {
        match self {
            Self::Memory(store) => store.delete_connection(id).await,
            Self::Redis(store) => store.delete_connection(id).await,
        }
    }

    /// List the broadcast-eligible connections bound to a session.
    ///
    /// # Errors
    ///
    /// Backend I/O failures only.
    pub async fn list_connections_by_session(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<Connection>, StoreError> {
        match self {
            Self::Memory(store) => store.list_connections_by_session(session_id).await,
            Self::Redis(store) => store.list_connections_by_session(session_id).await,
        }
    }

    /// List every non-terminal connection, for the latency sweeper and
    /// stale reaper.
    ///
    /// # Errors
    ///
    /// Backend I/O failures only.
    pub async fn list_active_connections(&self) -> Result<Vec<Connection>, StoreError> {
        match self {
            Self::Memory(store) => store.list_active_connections().await,
            Self::Redis(store) => store.list_active_connections().await,
        }
    }
}
