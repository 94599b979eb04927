//! Storage layer for Cadence broadcaster nodes.
//!
//! Sessions and connections are small JSON rows with TTLs; the broadcaster
//! only ever needs point reads, conditional status writes, and three
//! listings (active sessions, eligible connections per session, active
//! connections). [`Store`] exposes exactly that contract and dispatches to
//! the selected backend:
//!
//! - [`memory`] -- process-local maps for single-node runs and tests
//! - [`redis`] -- JSON rows + index sets in Redis for multi-node regions
//!
//! [`retry`] provides the bounded-backoff/deadline wrapper used on the
//! request path; the tick loop instead skips-and-logs so it never stalls.

pub mod error;
pub mod memory;
pub mod redis;
pub mod retry;
pub mod store;

// Re-export primary types for convenience.
pub use error::StoreError;
pub use memory::MemoryStore;
pub use redis::RedisStore;
pub use retry::{with_retry, DEFAULT_ATTEMPTS, DEFAULT_DEADLINE};
pub use store::Store;
