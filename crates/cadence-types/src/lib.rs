//! Shared type definitions for the Cadence tick-broadcasting backend.
//!
//! This crate is the single source of truth for the types that cross
//! crate boundaries: identifiers, lifecycle enums, persisted records, and
//! the duplex-channel message schemas. Client-facing types flow to
//! `TypeScript` via `ts-rs` for the browser client.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers for sessions and connections
//! - [`enums`] -- Session/connection lifecycle and latency classification
//! - [`records`] -- Persisted `Session` and `Connection` rows
//! - [`messages`] -- Inbound and outbound duplex-channel messages

pub mod enums;
pub mod ids;
pub mod messages;
pub mod records;

// Re-export all public types at crate root for convenience.
pub use enums::{ConnectionStatus, LatencyStatus, SessionStatus};
pub use ids::{ConnectionId, SessionId};
pub use messages::{ClientMessage, ErrorCode, ServerMessage};
pub use records::{Connection, Session};
