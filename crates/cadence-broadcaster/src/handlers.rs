//! REST API endpoint handlers for a broadcaster node.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/sessions` | Create a session |
//! | `GET` | `/sessions/{id}` | Session snapshot |
//! | `GET` | `/sessions/{id}/state` | Engine state computed at request time |
//! | `POST` | `/sessions/{id}/stop` | Stop a session |
//! | `GET` | `/healthz` | Liveness probe |

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use cadence_store::{with_retry, StoreError};
use cadence_types::{Session, SessionId, SessionStatus};
use rand::Rng;
use tracing::{debug, info};

use crate::error::ApiError;
use crate::state::{now_ms, AppState};

/// Request body for `POST /sessions`.
#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    /// Opaque principal creating the session. Required.
    #[serde(default)]
    pub user_id: String,
    /// Region hint from the edge router. Advisory only; the created row
    /// is always tagged with the owning broadcaster's region.
    #[serde(default)]
    pub preferred_region: Option<String>,
    /// Tick period override. Defaults to the configured tick period.
    #[serde(default)]
    pub tick_ms: Option<i64>,
    /// Start instant override (epoch ms). Defaults to now + countdown.
    #[serde(default)]
    pub start_at: Option<i64>,
}

// ---------------------------------------------------------------------------
// POST /sessions
// ---------------------------------------------------------------------------

/// Create a session owned by this broadcaster.
///
/// # Errors
///
/// 400 for a missing `userId` or non-positive `tickMs`; 409 on a session
/// ID collision; 500 when the store fails after retries.
pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.user_id.trim().is_empty() {
        return Err(ApiError::InvalidRequest(String::from("userId is required")));
    }

    let tick_ms = request
        .tick_ms
        .unwrap_or(state.config.session.default_tick_ms);
    if tick_ms <= 0 {
        return Err(ApiError::InvalidRequest(String::from(
            "tickMs must be greater than 0",
        )));
    }

    if let Some(preferred) = &request.preferred_region {
        if *preferred != state.config.server.region {
            debug!(
                preferred_region = preferred,
                region = state.config.server.region,
                "preferred region differs from owning broadcaster"
            );
        }
    }

    let now = now_ms();
    let session = Session {
        session_id: SessionId::new(),
        seed: rand::rng().random_range(0..i64::MAX),
        start_at_ms: request
            .start_at
            .unwrap_or(now + state.config.session.countdown_ms),
        tick_ms,
        status: SessionStatus::Waiting,
        region: state.config.server.region.clone(),
        created_at_ms: now,
        expires_at_ms: now + state.config.session.session_ttl_seconds * 1000,
        current_step: None,
        current_value: None,
        current_round: None,
    };

    with_retry("create_session", state.store_deadline(), || {
        state.store.create_session(&session)
    })
    .await?;

    info!(
        session_id = %session.session_id,
        user_id = request.user_id,
        tick_ms = session.tick_ms,
        start_at_ms = session.start_at_ms,
        "session created"
    );

    let body = serde_json::json!({
        "sessionId": session.session_id,
        "seed": session.seed,
        "startAt": session.start_at_ms,
        "tickMs": session.tick_ms,
        "region": session.region,
        "wsEndpoint": state.config.server.ws_endpoint(),
        "httpEndpoint": state.config.server.http_endpoint(),
    });
    Ok((StatusCode::CREATED, Json(body)))
}

// ---------------------------------------------------------------------------
// GET /sessions/{id}
// ---------------------------------------------------------------------------

/// Return a session snapshot including the current player count.
pub async fn get_session(
    State(state): State<AppState>,
    Path(id_str): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session_id = parse_session_id(&id_str)?;

    let session = with_retry("get_session", state.store_deadline(), || {
        state.store.get_session(session_id)
    })
    .await?;

    let player_count = state
        .store
        .list_connections_by_session(session_id)
        .await
        .map(|connections| connections.len())
        .unwrap_or(0);

    let body = serde_json::json!({
        "sessionId": session.session_id,
        "seed": session.seed,
        "startAt": session.start_at_ms,
        "tickMs": session.tick_ms,
        "status": session.status,
        "region": session.region,
        "playerCount": player_count,
        "wsEndpoint": state.config.server.ws_endpoint(),
    });
    Ok(Json(body))
}

// ---------------------------------------------------------------------------
// GET /sessions/{id}/state
// ---------------------------------------------------------------------------

/// Compute and return the engine state at request time.
///
/// Authoritative by construction: the state is recomputed from the
/// session parameters, never read from the cached fields.
pub async fn get_session_state(
    State(state): State<AppState>,
    Path(id_str): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session_id = parse_session_id(&id_str)?;

    let session = with_retry("get_session", state.store_deadline(), || {
        state.store.get_session(session_id)
    })
    .await?;

    let now = now_ms();
    let engine_state =
        cadence_engine::state_at(session.seed, session.start_at_ms, session.tick_ms, now);

    let body = serde_json::json!({
        "step": engine_state.step,
        "value": engine_state.value,
        "round": engine_state.round,
        "broken": engine_state.broken,
        "computedAt": now,
    });
    Ok(Json(body))
}

// ---------------------------------------------------------------------------
// POST /sessions/{id}/stop
// ---------------------------------------------------------------------------

/// Stop a session. Stopped is terminal; the tick loop drops the session
/// at its next cache refresh.
pub async fn stop_session(
    State(state): State<AppState>,
    Path(id_str): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session_id = parse_session_id(&id_str)?;

    let session = with_retry("get_session", state.store_deadline(), || {
        state.store.get_session(session_id)
    })
    .await?;

    if session.status == SessionStatus::Stopped {
        return Err(ApiError::InvalidRequest(String::from(
            "session already stopped",
        )));
    }

    match with_retry("update_session_status", state.store_deadline(), || {
        state
            .store
            .update_session_status(session_id, SessionStatus::Stopped)
    })
    .await
    {
        Ok(()) => {}
        // Lost a race with another stop request.
        Err(StoreError::InvalidTransition { .. }) => {
            return Err(ApiError::InvalidRequest(String::from(
                "session already stopped",
            )));
        }
        Err(error) => return Err(error.into()),
    }

    info!(session_id = %session_id, "session stopped");

    let body = serde_json::json!({
        "sessionId": session_id,
        "status": SessionStatus::Stopped,
    });
    Ok(Json(body))
}

// ---------------------------------------------------------------------------
// GET /healthz
// ---------------------------------------------------------------------------

/// Liveness probe.
pub async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Parse a session ID from a path segment.
fn parse_session_id(s: &str) -> Result<SessionId, ApiError> {
    s.parse::<SessionId>()
        .map_err(|e| ApiError::InvalidRequest(format!("invalid session id {s}: {e}")))
}
