//! Error types for the store layer.

/// Errors that can occur in the store layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A row with the same identifier already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The requested row does not exist (or has expired).
    #[error("not found: {0}")]
    NotFound(String),

    /// The requested status change violates the monotone lifecycle of
    /// the row as currently stored.
    #[error("invalid transition for {entity}: {from} -> {to}")]
    InvalidTransition {
        /// Which row was being updated.
        entity: String,
        /// The status found in the store.
        from: String,
        /// The status the caller asked for.
        to: String,
    },

    /// A Redis operation failed.
    #[error("redis error: {0}")]
    Redis(#[from] fred::error::Error),

    /// A row could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The operation did not complete within its deadline.
    #[error("deadline exceeded: {0}")]
    Deadline(String),

    /// A configuration error (bad URL, bad stored value).
    #[error("configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// Whether retrying the same operation could plausibly succeed.
    ///
    /// Only infrastructure failures are transient; semantic failures
    /// (missing rows, collisions, illegal transitions) are not.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Redis(_) | Self::Deadline(_))
    }
}
