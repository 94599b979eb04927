//! Redis store backend.
//!
//! Rows are stored as JSON with a native TTL; index sets make the active
//! listings cheap without scanning the keyspace.
//!
//! # Key Patterns
//!
//! | Pattern | Type | Description |
//! |---------|------|-------------|
//! | `session:{id}` | JSON | Full session row (TTL = session TTL) |
//! | `sessions:active` | Set | IDs of waiting/running sessions |
//! | `connection:{id}` | JSON | Full connection row (TTL = connection TTL) |
//! | `connections:active` | Set | IDs of non-terminal connections |
//! | `session:{id}:connections` | Set | Connection IDs bound to the session |
//!
//! Index sets are cleaned lazily: a listing that finds a member whose row
//! has expired removes the member and skips it, so listings may briefly
//! include just-expired rows -- callers treat those as no-ops.

use cadence_types::{Connection, ConnectionId, ConnectionStatus, Session, SessionId, SessionStatus};
use fred::prelude::*;

use crate::error::StoreError;

/// Connection handle to a Redis instance.
#[derive(Clone)]
pub struct RedisStore {
    client: Client,
    session_ttl_secs: i64,
    connection_ttl_secs: i64,
}

const SESSIONS_ACTIVE: &str = "sessions:active";
const CONNECTIONS_ACTIVE: &str = "connections:active";

/// Deadline applied to every Redis command. Callers that cannot retry
/// (the tick loop) rely on this to bound a pass; request-path callers
/// layer [`crate::retry::with_retry`] on top.
const COMMAND_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

fn session_key(id: SessionId) -> String {
    format!("session:{id}")
}

fn connection_key(id: ConnectionId) -> String {
    format!("connection:{id}")
}

fn session_connections_key(id: SessionId) -> String {
    format!("session:{id}:connections")
}

impl RedisStore {
    /// Connect to Redis at the given URL (`redis://host:port[/db]`).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] if the URL cannot be parsed, or
    /// [`StoreError::Redis`] if the connection fails.
    pub async fn connect(
        url: &str,
        session_ttl_secs: i64,
        connection_ttl_secs: i64,
    ) -> Result<Self, StoreError> {
        let config =
            Config::from_url(url).map_err(|e| StoreError::Config(format!("invalid Redis URL: {e}")))?;

        let client = Builder::from_config(config)
            .with_performance_config(|perf| {
                perf.default_command_timeout = COMMAND_TIMEOUT;
            })
            .build()?;
        client.init().await?;

        tracing::info!("Connected to Redis");
        Ok(Self {
            client,
            session_ttl_secs,
            connection_ttl_secs,
        })
    }

    async fn set_json<T: serde::Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: i64,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(value)?;
        let expiration = (ttl_secs > 0).then_some(Expiration::EX(ttl_secs));
        let _: () = self
            .client
            .set(key, json.as_str(), expiration, None, false)
            .await?;
        Ok(())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        let value: Option<String> = self.client.get(key).await?;
        match value {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    // -----------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------

    pub(crate) async fn create_session(&self, session: &Session) -> Result<(), StoreError> {
        let key = session_key(session.session_id);
        let exists: u64 = self.client.exists(key.as_str()).await?;
        if exists > 0 {
            return Err(StoreError::AlreadyExists(format!(
                "session {}",
                session.session_id
            )));
        }

        self.set_json(&key, session, self.session_ttl_secs).await?;
        let _: u64 = self
            .client
            .sadd(SESSIONS_ACTIVE, session.session_id.to_string().as_str())
            .await?;
        Ok(())
    }

    pub(crate) async fn get_session(&self, id: SessionId) -> Result<Session, StoreError> {
        self.get_json::<Session>(&session_key(id))
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("session {id}")))
    }

    pub(crate) async fn update_session_status(
        &self,
        id: SessionId,
        status: SessionStatus,
    ) -> Result<(), StoreError> {
        let mut session = self.get_session(id).await?;
        if !session.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                entity: format!("session {id}"),
                from: format!("{:?}", session.status),
                to: format!("{status:?}"),
            });
        }
        session.status = status;
        self.set_json(&session_key(id), &session, self.session_ttl_secs)
            .await?;

        if !status.is_active() {
            let _: u64 = self
                .client
                .srem(SESSIONS_ACTIVE, id.to_string().as_str())
                .await?;
        }
        Ok(())
    }

    pub(crate) async fn update_session_state(
        &self,
        id: SessionId,
        step: i64,
        value: i64,
        round: i64,
    ) -> Result<(), StoreError> {
        let mut session = self.get_session(id).await?;
        session.current_step = Some(step);
        session.current_value = Some(value);
        session.current_round = Some(round);
        self.set_json(&session_key(id), &session, self.session_ttl_secs)
            .await
    }

    pub(crate) async fn list_active_sessions(&self) -> Result<Vec<Session>, StoreError> {
        let members: Vec<String> = self.client.smembers(SESSIONS_ACTIVE).await?;
        let mut sessions = Vec::with_capacity(members.len());
        for member in &members {
            let Ok(id) = member.parse::<SessionId>() else {
                let _: u64 = self.client.srem(SESSIONS_ACTIVE, member.as_str()).await?;
                continue;
            };
            match self.get_json::<Session>(&session_key(id)).await? {
                Some(session) if session.status.is_active() => sessions.push(session),
                // Expired or no longer active: drop the stale index member.
                _ => {
                    let _: u64 = self.client.srem(SESSIONS_ACTIVE, member.as_str()).await?;
                }
            }
        }
        Ok(sessions)
    }

    // -----------------------------------------------------------------
    // Connections
    // -----------------------------------------------------------------

    pub(crate) async fn create_connection(&self, connection: &Connection) -> Result<(), StoreError> {
        let key = connection_key(connection.connection_id);
        let exists: u64 = self.client.exists(key.as_str()).await?;
        if exists > 0 {
            return Err(StoreError::AlreadyExists(format!(
                "connection {}",
                connection.connection_id
            )));
        }

        self.set_json(&key, connection, self.connection_ttl_secs)
            .await?;
        let _: u64 = self
            .client
            .sadd(
                CONNECTIONS_ACTIVE,
                connection.connection_id.to_string().as_str(),
            )
            .await?;
        Ok(())
    }

    pub(crate) async fn get_connection(&self, id: ConnectionId) -> Result<Connection, StoreError> {
        self.get_json::<Connection>(&connection_key(id))
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("connection {id}")))
    }

    pub(crate) async fn bind_connection(
        &self,
        id: ConnectionId,
        session_id: SessionId,
        user_id: &str,
        joined_at_ms: i64,
    ) -> Result<(), StoreError> {
        let mut connection = self.get_connection(id).await?;
        if !connection.status.can_transition_to(ConnectionStatus::Ready) {
            return Err(StoreError::InvalidTransition {
                entity: format!("connection {id}"),
                from: format!("{:?}", connection.status),
                to: String::from("Ready"),
            });
        }
        connection.session_id = Some(session_id);
        connection.user_id = user_id.to_owned();
        connection.status = ConnectionStatus::Ready;
        connection.joined_at_ms = joined_at_ms;
        self.set_json(&connection_key(id), &connection, self.connection_ttl_secs)
            .await?;

        let _: u64 = self
            .client
            .sadd(
                session_connections_key(session_id).as_str(),
                id.to_string().as_str(),
            )
            .await?;
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
        let mut connection = self.get_connection(id).await?;
        connection.latency_history = history.to_vec();
        connection.avg_latency_ms = avg_latency_ms;
        connection.jitter_ms = jitter_ms;
        connection.last_ping_at_ms = last_ping_at_ms;
        connection.last_pong_at_ms = last_pong_at_ms;
        self.set_json(&connection_key(id), &connection, self.connection_ttl_secs)
            .await
    }

    pub(crate) async fn update_connection_status(
        &self,
        id: ConnectionId,
        status: ConnectionStatus,
        kick_reason: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut connection = self.get_connection(id).await?;
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
        self.set_json(&connection_key(id), &connection, self.connection_ttl_secs)
            .await?;

        if status.is_terminal() {
            let _: u64 = self
                .client
                .srem(CONNECTIONS_ACTIVE, id.to_string().as_str())
                .await?;
        }
        Ok(())
    }

    pub(crate) async fn delete_connection(&self, id: ConnectionId) -> Result<(), StoreError> {
        // Fetch first so the session index can be cleaned too.
        let session_id = match self.get_json::<Connection>(&connection_key(id)).await? {
            Some(connection) => connection.session_id,
            None => None,
        };

        let _: u64 = self.client.del(connection_key(id).as_str()).await?;
        let _: u64 = self
            .client
            .srem(CONNECTIONS_ACTIVE, id.to_string().as_str())
            .await?;
        if let Some(session_id) = session_id {
            let _: u64 = self
                .client
                .srem(
                    session_connections_key(session_id).as_str(),
                    id.to_string().as_str(),
                )
                .await?;
        }
        Ok(())
    }

    pub(crate) async fn list_connections_by_session(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<Connection>, StoreError> {
        let key = session_connections_key(session_id);
        let members: Vec<String> = self.client.smembers(key.as_str()).await?;
        let mut connections = Vec::with_capacity(members.len());
        for member in &members {
            let Ok(id) = member.parse::<ConnectionId>() else {
                let _: u64 = self.client.srem(key.as_str(), member.as_str()).await?;
                continue;
            };
            match self.get_json::<Connection>(&connection_key(id)).await? {
                Some(connection) if connection.is_broadcast_eligible() => {
                    connections.push(connection);
                }
                Some(_) => {}
                None => {
                    let _: u64 = self.client.srem(key.as_str(), member.as_str()).await?;
                }
            }
        }
        Ok(connections)
    }

    pub(crate) async fn list_active_connections(&self) -> Result<Vec<Connection>, StoreError> {
        let members: Vec<String> = self.client.smembers(CONNECTIONS_ACTIVE).await?;
        let mut connections = Vec::with_capacity(members.len());
        for member in &members {
            let Ok(id) = member.parse::<ConnectionId>() else {
                let _: u64 = self
                    .client
                    .srem(CONNECTIONS_ACTIVE, member.as_str())
                    .await?;
                continue;
            };
            match self.get_json::<Connection>(&connection_key(id)).await? {
                Some(connection) if !connection.status.is_terminal() => {
                    connections.push(connection);
                }
                _ => {
                    let _: u64 = self
                        .client
                        .srem(CONNECTIONS_ACTIVE, member.as_str())
                        .await?;
                }
            }
        }
        Ok(connections)
    }
}
