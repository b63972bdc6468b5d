//! Caller-side retry for optimistic conflicts
//!
//! The orchestrators never retry. A caller that wants "keep trying until the
//! version check passes" wraps the call here; every attempt re-runs the
//! operation, so it re-reads fresh state each time. Only errors with
//! [`CoreError::is_retryable`] are retried.

use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first (at least 1)
    pub max_attempts: u32,
    /// Delay before retry `n` is `backoff * n`
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_millis(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    #[inline]
    fn delay_before(&self, retry: u32) -> Duration {
        self.backoff * retry
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// attempt budget is spent. Returns the last error in the latter cases.
pub async fn with_conflict_retry<T, F, Fut>(policy: RetryPolicy, mut op: F) -> CoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CoreResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                debug!(attempt = attempt, code = e.code(), "Retrying after conflict");
                tokio::time::sleep(policy.delay_before(attempt)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Whether a finished retry loop gave up on a conflict
pub fn exhausted(result: &CoreResult<impl Sized>) -> bool {
    matches!(result, Err(CoreError::ConcurrencyConflict { .. }))
}
