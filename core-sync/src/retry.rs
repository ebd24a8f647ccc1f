//! Retry with exponential backoff, and timeout bounding for adapter calls

use crate::error::{Result, SyncError};
use bridge_traits::error::BridgeError;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

pub use core_runtime::config::RetryPolicy;

/// Final value of a retried operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOutcome<T> {
    pub value: T,
    /// Attempts made, including the first
    pub attempts: u32,
}

impl<T> RetryOutcome<T> {
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Run `attempt` until `succeeded` accepts its value or the policy's budget is spent.
///
/// Attempt `k` (zero-based) that fails is followed by a sleep of
/// `policy.delay_for_attempt(k)`. The value of the last attempt is returned
/// either way; callers decide how to surface a final failure.
pub async fn retry_with_backoff<T, F, Fut, P>(
    policy: &RetryPolicy,
    operation: &str,
    mut attempt: F,
    succeeded: P,
) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = T>,
    P: Fn(&T) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut index = 0;

    loop {
        let value = attempt(index).await;
        let attempts = index + 1;

        if succeeded(&value) {
            if attempts > 1 {
                debug!(operation, attempts, "Succeeded after retry");
            }
            return RetryOutcome { value, attempts };
        }

        if attempts >= max_attempts {
            warn!(operation, attempts, "Retry budget exhausted");
            return RetryOutcome { value, attempts };
        }

        let delay = policy.delay_for_attempt(index);
        warn!(
            operation,
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            "Attempt failed, backing off"
        );
        tokio::time::sleep(delay).await;
        index += 1;
    }
}

/// Bound an adapter call by `limit`, mapping its error with `wrap`.
pub(crate) async fn with_timeout<T, Fut>(
    limit: Duration,
    operation: &str,
    wrap: fn(BridgeError) -> SyncError,
    call: Fut,
) -> Result<T>
where
    Fut: Future<Output = bridge_traits::error::Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(wrap),
        Err(_) => Err(SyncError::Timeout {
            operation: operation.to_string(),
            seconds: limit.as_secs(),
        }),
    }
}
