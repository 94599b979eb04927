//! Broadcaster node for the Cadence backend.
//!
//! A node is one regional server process that:
//!
//! - serves the **HTTP API** for session creation, snapshots, computed
//!   state, and stop requests;
//! - accepts **WebSocket connections**, binds them to sessions on `join`,
//!   and answers `ping` with `pong` while sampling latency;
//! - runs the **tick loop**, recomputing each active session's state from
//!   wall clock and fanning ticks out to every eligible connection;
//! - enforces **latency quality** (warn on the soft bounds, kick on the
//!   hard bounds) and reaps stale or gone connections.
//!
//! # Architecture
//!
//! Game state is never mutated -- it is a pure function of the session
//! row and wall clock (see `cadence-engine`), so any node, and any number
//! of nodes sharing a store, derive identical ticks. The only in-process
//! state is the connection registry (transports and latency windows) and
//! the tick loop's session cache, each with a single owner.

pub mod broadcaster;
pub mod config;
pub mod connection;
pub mod error;
pub mod handlers;
pub mod latency;
pub mod registry;
pub mod router;
pub mod server;
pub mod state;
pub mod sweeper;
pub mod ws;

// Re-export primary types for convenience.
pub use broadcaster::{run_tick_loop, TickLoop};
pub use config::{BroadcasterConfig, ConfigError};
pub use error::ApiError;
pub use router::build_router;
pub use server::{start_server, ServerError};
pub use state::AppState;
pub use sweeper::{run_latency_sweeper, run_stale_reaper};
