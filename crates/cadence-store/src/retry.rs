//! Bounded retry and deadline wrapper for store operations.
//!
//! Request-path callers wrap store calls in [`with_retry`] so a transient
//! Redis hiccup does not fail a user request. The tick loop deliberately
//! does NOT retry inline -- it logs and skips the session for that pass,
//! and the next pass retries naturally.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::StoreError;

/// Number of attempts made before giving up on a transient failure.
pub const DEFAULT_ATTEMPTS: u32 = 3;

/// Default per-operation deadline.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(5);

/// Initial backoff between attempts; doubles after each failure.
const INITIAL_BACKOFF: Duration = Duration::from_millis(50);

/// Run `op` under a per-attempt deadline, retrying transient failures
/// with bounded exponential backoff.
///
/// Non-transient errors (not-found, already-exists, illegal transition)
/// are returned immediately without retrying.
///
/// # Errors
///
/// Returns the last error observed once all attempts are exhausted, or
/// [`StoreError::Deadline`] if every attempt timed out.
pub async fn with_retry<T, F, Fut>(
    op_name: &str,
    deadline: Duration,
    mut op: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut backoff = INITIAL_BACKOFF;
    let mut last_error: Option<StoreError> = None;

    for attempt in 1..=DEFAULT_ATTEMPTS {
        match tokio::time::timeout(deadline, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(error)) if !error.is_transient() => return Err(error),
            Ok(Err(error)) => {
                warn!(op = op_name, attempt, error = %error, "store operation failed, will retry");
                last_error = Some(error);
            }
            Err(_elapsed) => {
                warn!(op = op_name, attempt, deadline_ms = deadline.as_millis() as u64,
                    "store operation hit deadline, will retry");
                last_error = Some(StoreError::Deadline(op_name.to_owned()));
            }
        }

        if attempt < DEFAULT_ATTEMPTS {
            tokio::time::sleep(backoff).await;
            backoff = backoff.saturating_mul(2);
        }
    }

    Err(last_error.unwrap_or_else(|| StoreError::Deadline(op_name.to_owned())))
}
