//! Shared application state for a broadcaster node.
//!
//! [`AppState`] is handed to the HTTP handlers via Axum's `State`
//! extractor and cloned into the background loops. It deliberately does
//! NOT contain the session cache -- that is owned by the tick loop alone
//! (single-writer); everything else reaches sessions through the store.

use std::sync::Arc;

use cadence_store::Store;
use chrono::Utc;

use crate::config::BroadcasterConfig;
use crate::registry::ConnectionRegistry;

/// Shared state for one broadcaster node. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    /// Node configuration, fixed at startup.
    pub config: Arc<BroadcasterConfig>,
    /// Durable session/connection store.
    pub store: Store,
    /// Locally-owned connection transports and latency windows.
    pub registry: ConnectionRegistry,
}

impl AppState {
    /// Assemble the node state from its configuration and store handle.
    pub fn new(config: BroadcasterConfig, store: Store) -> Self {
        Self {
            config: Arc::new(config),
            store,
            registry: ConnectionRegistry::new(),
        }
    }

    /// Per-operation deadline for store calls on the request path.
    pub fn store_deadline(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.config.store.op_deadline_seconds)
    }
}

/// Current wall-clock time in Unix milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
