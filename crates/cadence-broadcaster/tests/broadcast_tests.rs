//! Integration tests for the tick broadcast cycle.
//!
//! The tick loop is driven pass-by-pass with explicit wall-clock values,
//! with outbound frames read from the per-connection channels exactly as
//! socket tasks would drain them.

#![allow(clippy::unwrap_used)]

use cadence_broadcaster::broadcaster::TickLoop;
use cadence_broadcaster::connection;
use cadence_broadcaster::registry::Outbound;
use cadence_broadcaster::state::now_ms;
use cadence_broadcaster::{AppState, BroadcasterConfig};
use cadence_store::{Store, StoreError};
use cadence_types::{
    ClientMessage, ConnectionId, ConnectionStatus, ServerMessage, Session, SessionId,
    SessionStatus,
};
use tokio::sync::mpsc;

fn make_state() -> AppState {
    AppState::new(BroadcasterConfig::default(), Store::memory())
}

/// A second node over the same store: own registry, own tick loop.
fn make_peer(state: &AppState) -> AppState {
    AppState::new(BroadcasterConfig::default(), state.store.clone())
}

async fn seed_session(state: &AppState, start_at_ms: i64, tick_ms: i64) -> Session {
    let now = now_ms();
    let session = Session {
        session_id: SessionId::new(),
        seed: 12345,
        start_at_ms,
        tick_ms,
        status: SessionStatus::Waiting,
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

/// Open a connection and join it to the session, draining the ack.
async fn join_player(
    state: &AppState,
    session_id: SessionId,
) -> (ConnectionId, mpsc::Receiver<Outbound>) {
    let (id, mut rx) = connection::open(state).await.unwrap();
    connection::handle_message(
        state,
        id,
        ClientMessage::Join {
            session_id,
            user_id: String::from("u-1"),
        },
    )
    .await;
    drain(&mut rx);
    (id, rx)
}

fn drain(rx: &mut mpsc::Receiver<Outbound>) -> Vec<ServerMessage> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        if let Outbound::Message(message) = frame {
            frames.push(message);
        }
    }
    frames
}

fn ticks(frames: &[ServerMessage]) -> Vec<(i64, i64, i64, bool)> {
    frames
        .iter()
        .filter_map(|m| match m {
            ServerMessage::Tick {
                step,
                value,
                round,
                broken,
                ..
            } => Some((*step, *value, *round, *broken)),
            _ => None,
        })
        .collect()
}

// =========================================================================
// Countdown and start
// =========================================================================

#[tokio::test]
async fn waiting_session_receives_countdown() {
    let state = make_state();
    let now = now_ms();
    let session = seed_session(&state, now + 5000, 100).await;
    let (_id, mut rx) = join_player(&state, session.session_id).await;

    let mut tick_loop = TickLoop::new(state.clone());
    tick_loop.refresh().await;
    tick_loop.run_pass(now).await;

    let frames = drain(&mut rx);
    assert_eq!(frames.len(), 1);
    match &frames[0] {
        ServerMessage::Countdown {
            remaining_ms,
            start_at,
        } => {
            assert_eq!(*start_at, session.start_at_ms);
            assert!(*remaining_ms > 0 && *remaining_ms <= 5000);
        }
        other => panic!("expected countdown, got {other:?}"),
    }

    // Still waiting in the store.
    let stored = state.store.get_session(session.session_id).await.unwrap();
    assert_eq!(stored.status, SessionStatus::Waiting);
}

#[tokio::test]
async fn countdown_turns_into_ticks_at_start() {
    let state = make_state();
    let now = now_ms();
    let session = seed_session(&state, now + 300, 100).await;
    let (_id, mut rx) = join_player(&state, session.session_id).await;

    let mut tick_loop = TickLoop::new(state.clone());
    tick_loop.refresh().await;
    for pass in 0..3 {
        tick_loop.run_pass(now + pass * 100).await;
    }
    // The start instant: countdown ends, step 0 goes out with value 1.
    tick_loop.run_pass(now + 300).await;

    let frames = drain(&mut rx);
    let countdowns = frames
        .iter()
        .filter(|m| matches!(m, ServerMessage::Countdown { .. }))
        .count();
    assert_eq!(countdowns, 3);
    assert_eq!(ticks(&frames), vec![(0, 1, 0, false)]);

    let stored = state.store.get_session(session.session_id).await.unwrap();
    assert_eq!(stored.status, SessionStatus::Running);
}

#[tokio::test]
async fn empty_session_is_skipped_entirely() {
    let state = make_state();
    let now = now_ms();
    let session = seed_session(&state, now - 1000, 100).await;

    let mut tick_loop = TickLoop::new(state.clone());
    tick_loop.refresh().await;
    tick_loop.run_pass(now).await;

    // No connections: no lifecycle transition either.
    let stored = state.store.get_session(session.session_id).await.unwrap();
    assert_eq!(stored.status, SessionStatus::Waiting);
}

// =========================================================================
// Tick emission
// =========================================================================

#[tokio::test]
async fn steps_are_strictly_monotone_and_emitted_once() {
    let state = make_state();
    let now = now_ms();
    let session = seed_session(&state, now, 100).await;
    let (_id, mut rx) = join_player(&state, session.session_id).await;

    let mut tick_loop = TickLoop::new(state.clone());
    tick_loop.refresh().await;

    // Duplicate passes at the same instant must not duplicate steps;
    // a stalled dispatcher emits only the latest step.
    for offset in [0, 0, 100, 150, 200, 200, 500] {
        tick_loop.run_pass(now + offset).await;
    }

    let emitted = ticks(&drain(&mut rx));
    let steps: Vec<i64> = emitted.iter().map(|t| t.0).collect();
    assert_eq!(steps, vec![0, 1, 2, 5]);
    // Before the first break the value tracks step + 1.
    for (step, value, round, broken) in emitted {
        assert_eq!(value, step + 1);
        assert_eq!(round, 0);
        assert!(!broken);
    }
}

#[tokio::test]
async fn delivered_tick_moves_connection_to_playing() {
    let state = make_state();
    let now = now_ms();
    let session = seed_session(&state, now, 100).await;
    let (id, _rx) = join_player(&state, session.session_id).await;

    let mut tick_loop = TickLoop::new(state.clone());
    tick_loop.refresh().await;
    tick_loop.run_pass(now).await;

    let row = state.store.get_connection(id).await.unwrap();
    assert_eq!(row.status, ConnectionStatus::Playing);
}

#[tokio::test]
async fn cached_state_is_written_on_step_advance() {
    let state = make_state();
    let now = now_ms();
    let session = seed_session(&state, now - 550, 100).await;
    let (_id, _rx) = join_player(&state, session.session_id).await;

    let mut tick_loop = TickLoop::new(state.clone());
    tick_loop.refresh().await;
    tick_loop.run_pass(now).await;

    let stored = state.store.get_session(session.session_id).await.unwrap();
    assert_eq!(stored.current_step, Some(5));
    assert_eq!(stored.current_value, Some(6));
    assert_eq!(stored.current_round, Some(0));
}

// =========================================================================
// Reaping gone connections
// =========================================================================

#[tokio::test]
async fn gone_transport_is_reaped_from_the_store() {
    let state = make_state();
    let now = now_ms();
    let session = seed_session(&state, now, 100).await;
    let (alive_id, mut alive_rx) = join_player(&state, session.session_id).await;
    let (gone_id, gone_rx) = join_player(&state, session.session_id).await;

    // Simulate a closed transport.
    drop(gone_rx);

    let mut tick_loop = TickLoop::new(state.clone());
    tick_loop.refresh().await;
    tick_loop.run_pass(now).await;

    // The gone connection is deleted; the session listing no longer
    // includes it.
    assert!(matches!(
        state.store.get_connection(gone_id).await,
        Err(StoreError::NotFound(_))
    ));
    let remaining = state
        .store
        .list_connections_by_session(session.session_id)
        .await
        .unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].connection_id, alive_id);

    // The surviving connection got its tick.
    assert_eq!(ticks(&drain(&mut alive_rx)).len(), 1);
}

// =========================================================================
// Stop semantics
// =========================================================================

#[tokio::test]
async fn stopped_session_receives_nothing_after_refresh() {
    let state = make_state();
    let now = now_ms();
    let session = seed_session(&state, now, 100).await;
    let (_id, mut rx) = join_player(&state, session.session_id).await;

    let mut tick_loop = TickLoop::new(state.clone());
    tick_loop.refresh().await;
    tick_loop.run_pass(now).await;
    assert_eq!(ticks(&drain(&mut rx)).len(), 1);

    state
        .store
        .update_session_status(session.session_id, SessionStatus::Stopped)
        .await
        .unwrap();

    // The refresh drops the session from the cache...
    tick_loop.refresh().await;
    assert_eq!(tick_loop.cached_sessions(), 0);

    // ...and later passes emit nothing for it.
    tick_loop.run_pass(now + 100).await;
    tick_loop.run_pass(now + 200).await;
    assert!(drain(&mut rx).is_empty());
}

// =========================================================================
// Cross-node determinism
// =========================================================================

#[tokio::test]
async fn two_nodes_emit_identical_ticks_for_one_session() {
    let node_a = make_state();
    let node_b = make_peer(&node_a);
    let now = now_ms();
    let session = seed_session(&node_a, now, 100).await;

    // One client on each node, same session row.
    let (_a_id, mut a_rx) = join_player(&node_a, session.session_id).await;
    let (_b_id, mut b_rx) = join_player(&node_b, session.session_id).await;

    let mut loop_a = TickLoop::new(node_a.clone());
    let mut loop_b = TickLoop::new(node_b.clone());
    loop_a.refresh().await;
    loop_b.refresh().await;

    for offset in [0, 100, 200, 300] {
        loop_a.run_pass(now + offset).await;
        loop_b.run_pass(now + offset).await;
    }

    let a_ticks = ticks(&drain(&mut a_rx));
    let b_ticks = ticks(&drain(&mut b_rx));
    assert_eq!(a_ticks.len(), 4);
    // Bit-identical {step, value, round, broken} on both nodes.
    assert_eq!(a_ticks, b_ticks);
}
