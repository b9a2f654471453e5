//! Retry with exponential backoff.
//!
//! Each call owns its attempt counter; nothing is shared between concurrent calls.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

use crate::error::Result;

/// Hard ceiling on retries regardless of what callers ask for
pub const MAX_RETRIES_CAP: u32 = 10;

/// Backoff parameters for one retrying call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubles each retry
    pub initial_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// # Arguments
    /// * `max_retries` - Retries after the first attempt, capped at `MAX_RETRIES_CAP`
    /// * `initial_delay` - Wait before the first retry; doubles on each one
    pub fn new(max_retries: u32, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            ..Self::default()
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Delay before retry number `attempt` (0-based): `initial * 2^attempt`,
    /// clamped to `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let multiplier = 1u32 << attempt.min(16);
        self.initial_delay
            .saturating_mul(multiplier)
            .min(self.max_delay)
    }

    fn retries(&self) -> u32 {
        self.max_retries.min(MAX_RETRIES_CAP)
    }
}

// == With Retry ==
/// Runs `operation`, retrying every failure until the policy is exhausted.
/// The final error is returned unchanged.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    with_retry_if(policy, |_| true, operation).await
}

/// Like `with_retry`, but gives up immediately on errors `should_retry` rejects.
pub async fn with_retry_if<T, F, Fut, P>(
    policy: RetryPolicy,
    should_retry: P,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&crate::error::NetError) -> bool,
{
    let retries = policy.retries();
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < retries && should_retry(&err) => {
                let delay = policy.delay_for(attempt);
                debug!(
                    attempt = attempt + 1,
                    max_retries = retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying after failure"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
