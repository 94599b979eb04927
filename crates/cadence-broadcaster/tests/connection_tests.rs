//! Integration tests for the connection lifecycle and latency policy.
//!
//! These drive the connection manager directly, standing in for the
//! WebSocket task: outbound frames are read from the per-connection
//! channel exactly as the socket task would drain them.

#![allow(clippy::unwrap_used)]

use cadence_broadcaster::connection;
use cadence_broadcaster::registry::Outbound;
use cadence_broadcaster::state::now_ms;
use cadence_broadcaster::{AppState, BroadcasterConfig};
use cadence_store::{Store, StoreError};
use cadence_types::{
    ClientMessage, ConnectionId, ConnectionStatus, ErrorCode, LatencyStatus, ServerMessage,
    Session, SessionId, SessionStatus,
};
use tokio::sync::mpsc;

fn make_state() -> AppState {
    AppState::new(BroadcasterConfig::default(), Store::memory())
}

async fn seed_session(state: &AppState, status: SessionStatus) -> Session {
    let now = now_ms();
    let session = Session {
        session_id: SessionId::new(),
        seed: 12345,
        start_at_ms: now + 3000,
        tick_ms: 100,
        status,
        region: String::from("local"),
        created_at_ms: now,
        expires_at_ms: now + 86_400_000,
        current_step: None,
        current_value: None,
        current_round: None,
    };
    state.store.create_session(&session).await.unwrap();
    session
}

/// Pop every frame currently queued for the connection.
fn drain(rx: &mut mpsc::Receiver<Outbound>) -> Vec<Outbound> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    frames
}

fn messages(frames: &[Outbound]) -> Vec<ServerMessage> {
    frames
        .iter()
        .filter_map(|f| match f {
            Outbound::Message(m) => Some(m.clone()),
            Outbound::Close => None,
        })
        .collect()
}

async fn join(
    state: &AppState,
    id: ConnectionId,
    session_id: SessionId,
) {
    connection::handle_message(
        state,
        id,
        ClientMessage::Join {
            session_id,
            user_id: String::from("u-1"),
        },
    )
    .await;
}

/// Send a ping whose sample will be roughly `rtt_ms`.
async fn ping(state: &AppState, id: ConnectionId, rtt_ms: i64) {
    connection::handle_message(
        state,
        id,
        ClientMessage::Ping {
            client_timestamp: now_ms() - rtt_ms,
        },
    )
    .await;
}

// =========================================================================
// Join
// =========================================================================

#[tokio::test]
async fn join_binds_and_acknowledges() {
    let state = make_state();
    let session = seed_session(&state, SessionStatus::Waiting).await;
    let (id, mut rx) = connection::open(&state).await.unwrap();

    join(&state, id, session.session_id).await;

    let frames = messages(&drain(&mut rx));
    assert_eq!(frames.len(), 1);
    match &frames[0] {
        ServerMessage::SessionJoined {
            session_id,
            seed,
            start_at,
            tick_ms,
            ..
        } => {
            assert_eq!(*session_id, session.session_id);
            assert_eq!(*seed, session.seed);
            assert_eq!(*start_at, session.start_at_ms);
            assert_eq!(*tick_ms, session.tick_ms);
        }
        other => panic!("expected session_joined, got {other:?}"),
    }

    let row = state.store.get_connection(id).await.unwrap();
    assert_eq!(row.status, ConnectionStatus::Ready);
    assert_eq!(row.session_id, Some(session.session_id));
    assert_eq!(row.user_id, "u-1");
    assert!(row.joined_at_ms > 0);
}

#[tokio::test]
async fn second_join_is_invalid_request() {
    let state = make_state();
    let session = seed_session(&state, SessionStatus::Waiting).await;
    let (id, mut rx) = connection::open(&state).await.unwrap();

    join(&state, id, session.session_id).await;
    join(&state, id, session.session_id).await;

    let frames = messages(&drain(&mut rx));
    assert_eq!(frames.len(), 2);
    match &frames[1] {
        ServerMessage::Error { code, .. } => assert_eq!(*code, ErrorCode::InvalidRequest),
        other => panic!("expected error, got {other:?}"),
    }
    // Still bound to the original session.
    let row = state.store.get_connection(id).await.unwrap();
    assert_eq!(row.session_id, Some(session.session_id));
}

#[tokio::test]
async fn join_unknown_session_reports_not_found() {
    let state = make_state();
    let (id, mut rx) = connection::open(&state).await.unwrap();

    join(&state, id, SessionId::new()).await;

    let frames = messages(&drain(&mut rx));
    match &frames[0] {
        ServerMessage::Error { code, .. } => assert_eq!(*code, ErrorCode::SessionNotFound),
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn join_stopped_session_is_rejected() {
    let state = make_state();
    let session = seed_session(&state, SessionStatus::Stopped).await;
    let (id, mut rx) = connection::open(&state).await.unwrap();

    join(&state, id, session.session_id).await;

    let frames = messages(&drain(&mut rx));
    match &frames[0] {
        ServerMessage::Error { code, .. } => assert_eq!(*code, ErrorCode::InvalidRequest),
        other => panic!("expected error, got {other:?}"),
    }
}

// =========================================================================
// Ping / pong and sampling
// =========================================================================

#[tokio::test]
async fn ping_answers_pong_and_records_sample() {
    let state = make_state();
    let session = seed_session(&state, SessionStatus::Waiting).await;
    let (id, mut rx) = connection::open(&state).await.unwrap();
    join(&state, id, session.session_id).await;
    drain(&mut rx);

    let client_timestamp = now_ms() - 20;
    connection::handle_message(&state, id, ClientMessage::Ping { client_timestamp }).await;

    let frames = messages(&drain(&mut rx));
    assert_eq!(frames.len(), 1);
    match &frames[0] {
        ServerMessage::Pong {
            client_timestamp: echoed,
            server_timestamp,
        } => {
            assert_eq!(*echoed, client_timestamp);
            assert!(*server_timestamp >= client_timestamp);
        }
        other => panic!("expected pong, got {other:?}"),
    }

    let row = state.store.get_connection(id).await.unwrap();
    assert_eq!(row.latency_history.len(), 1);
    assert!(row.latency_history[0] >= 20);
    assert!(row.last_ping_at_ms > 0);
    assert!(row.last_pong_at_ms > 0);
}

#[tokio::test]
async fn no_classification_below_sample_count() {
    let state = make_state();
    let session = seed_session(&state, SessionStatus::Waiting).await;
    let (id, mut rx) = connection::open(&state).await.unwrap();
    join(&state, id, session.session_id).await;
    drain(&mut rx);

    // Four terrible samples: one short of the window.
    for _ in 0..4 {
        ping(&state, id, 500).await;
    }

    let frames = messages(&drain(&mut rx));
    assert_eq!(frames.len(), 4);
    assert!(frames
        .iter()
        .all(|m| matches!(m, ServerMessage::Pong { .. })));
    let row = state.store.get_connection(id).await.unwrap();
    assert_eq!(row.status, ConnectionStatus::Ready);
}

// =========================================================================
// Kick policy (critical breach)
// =========================================================================

#[tokio::test]
async fn fifth_bad_sample_kicks_exactly_once() {
    let state = make_state();
    let session = seed_session(&state, SessionStatus::Waiting).await;
    let (id, mut rx) = connection::open(&state).await.unwrap();
    join(&state, id, session.session_id).await;
    drain(&mut rx);

    for _ in 0..5 {
        ping(&state, id, 200).await;
    }
    // Pings after the kick are ignored entirely.
    ping(&state, id, 200).await;

    let frames = drain(&mut rx);
    let kicked: Vec<&Outbound> = frames
        .iter()
        .filter(|f| matches!(f, Outbound::Message(ServerMessage::Kicked { .. })))
        .collect();
    assert_eq!(kicked.len(), 1, "expected exactly one kicked frame");

    match kicked[0] {
        Outbound::Message(ServerMessage::Kicked {
            reason,
            avg_latency,
            max_latency,
            max_jitter,
            ..
        }) => {
            assert!(reason.contains("exceeds"));
            assert!(*avg_latency >= 200);
            assert_eq!(*max_latency, 150);
            assert_eq!(*max_jitter, 50);
        }
        _ => unreachable!(),
    }

    // The kicked frame is followed by the transport close.
    let kicked_at = frames
        .iter()
        .position(|f| matches!(f, Outbound::Message(ServerMessage::Kicked { .. })))
        .unwrap();
    assert!(matches!(frames[kicked_at + 1], Outbound::Close));

    let row = state.store.get_connection(id).await.unwrap();
    assert_eq!(row.status, ConnectionStatus::Kicked);
    assert!(row.kick_reason.as_deref().unwrap().contains("exceeds"));

    // No tick can reach a kicked connection.
    let outcome = state
        .registry
        .send(
            id,
            ServerMessage::Tick {
                step: 1,
                value: 2,
                round: 0,
                broken: false,
                server_timestamp: now_ms(),
            },
        )
        .await;
    assert_ne!(
        outcome,
        cadence_broadcaster::registry::SendOutcome::Delivered
    );
}

#[tokio::test]
async fn sweep_kicks_a_breaching_connection_between_pings() {
    let state = make_state();
    let session = seed_session(&state, SessionStatus::Waiting).await;
    let (id, mut rx) = connection::open(&state).await.unwrap();
    join(&state, id, session.session_id).await;
    drain(&mut rx);

    // Samples recorded without the ping path enforcing them.
    for _ in 0..5 {
        state.registry.record_sample(id, 300).await.unwrap();
    }

    cadence_broadcaster::sweeper::sweep_once(&state).await;

    let frames = messages(&drain(&mut rx));
    assert!(frames
        .iter()
        .any(|m| matches!(m, ServerMessage::Kicked { .. })));
    let row = state.store.get_connection(id).await.unwrap();
    assert_eq!(row.status, ConnectionStatus::Kicked);
}

// =========================================================================
// Warning policy (soft breach)
// =========================================================================

#[tokio::test]
async fn soft_breach_warns_once_and_never_kicks() {
    let state = make_state();
    let session = seed_session(&state, SessionStatus::Waiting).await;
    let (id, mut rx) = connection::open(&state).await.unwrap();
    join(&state, id, session.session_id).await;
    drain(&mut rx);

    // 120ms sits between the warning (100) and hard (150) bounds.
    for _ in 0..8 {
        ping(&state, id, 120).await;
    }

    let frames = messages(&drain(&mut rx));
    let warnings: Vec<&ServerMessage> = frames
        .iter()
        .filter(|m| matches!(m, ServerMessage::LatencyStatus { .. }))
        .collect();
    assert_eq!(warnings.len(), 1, "warning must emit once per transition");
    match warnings[0] {
        ServerMessage::LatencyStatus { status, avg_latency, .. } => {
            assert_eq!(*status, LatencyStatus::Warning);
            assert!(*avg_latency >= 120);
        }
        _ => unreachable!(),
    }
    assert!(!frames
        .iter()
        .any(|m| matches!(m, ServerMessage::Kicked { .. })));

    let row = state.store.get_connection(id).await.unwrap();
    assert_eq!(row.status, ConnectionStatus::Ready);
}

#[tokio::test]
async fn recovery_emits_a_single_ok_transition() {
    let state = make_state();
    let session = seed_session(&state, SessionStatus::Waiting).await;
    let (id, mut rx) = connection::open(&state).await.unwrap();
    join(&state, id, session.session_id).await;
    drain(&mut rx);

    let thresholds = state.config.latency.thresholds();

    // Degrade with controlled samples, then enforce.
    for _ in 0..5 {
        state.registry.record_sample(id, 120).await.unwrap();
    }
    let summary = state.registry.latency_summary(id, &thresholds).await.unwrap();
    connection::enforce_latency(&state, id, summary).await;
    connection::enforce_latency(&state, id, summary).await; // dedup

    // Recover fully, then enforce twice again.
    for _ in 0..5 {
        state.registry.record_sample(id, 20).await.unwrap();
    }
    let summary = state.registry.latency_summary(id, &thresholds).await.unwrap();
    connection::enforce_latency(&state, id, summary).await;
    connection::enforce_latency(&state, id, summary).await;

    let frames = messages(&drain(&mut rx));
    let statuses: Vec<LatencyStatus> = frames
        .iter()
        .filter_map(|m| match m {
            ServerMessage::LatencyStatus { status, .. } => Some(*status),
            _ => None,
        })
        .collect();
    assert_eq!(statuses, vec![LatencyStatus::Warning, LatencyStatus::Ok]);
}

// =========================================================================
// Stale reaping and disconnect
// =========================================================================

#[tokio::test]
async fn stale_connection_is_evicted() {
    let state = make_state();
    // A socket that opened and then went silent: never joined, so the
    // last ping instant alone gates staleness.
    let (id, mut rx) = connection::open(&state).await.unwrap();

    // Age the row past the staleness bound (60s default).
    let stale_instant = now_ms() - 120_000;
    state
        .store
        .update_latency(id, &[], 0, 0, stale_instant, stale_instant)
        .await
        .unwrap();

    cadence_broadcaster::sweeper::reap_stale_once(&state).await;

    assert!(matches!(
        state.store.get_connection(id).await,
        Err(StoreError::NotFound(_))
    ));
    assert!(!state.registry.contains(id).await);
    let frames = drain(&mut rx);
    assert!(frames.iter().any(|f| matches!(f, Outbound::Close)));
}

#[tokio::test]
async fn fresh_connection_survives_the_reaper() {
    let state = make_state();
    let session = seed_session(&state, SessionStatus::Waiting).await;
    let (id, _rx) = connection::open(&state).await.unwrap();
    join(&state, id, session.session_id).await;

    cadence_broadcaster::sweeper::reap_stale_once(&state).await;

    assert!(state.store.get_connection(id).await.is_ok());
    assert!(state.registry.contains(id).await);
}

#[tokio::test]
async fn disconnect_removes_the_row() {
    let state = make_state();
    let session = seed_session(&state, SessionStatus::Waiting).await;
    let (id, _rx) = connection::open(&state).await.unwrap();
    join(&state, id, session.session_id).await;

    connection::finalize_disconnect(&state, id).await;

    assert!(matches!(
        state.store.get_connection(id).await,
        Err(StoreError::NotFound(_))
    ));
    assert!(
        state
            .store
            .list_connections_by_session(session.session_id)
            .await
            .unwrap()
            .is_empty()
    );
}
