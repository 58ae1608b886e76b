//! Bounded retry for outbound network calls.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Errors that know whether another attempt could succeed
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Attempt budget and exponential backoff bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one
    pub retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// A policy that never waits (tests, dry runs)
    pub const fn immediate(retries: u32) -> Self {
        Self {
            retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1-based): base * 2^(attempt - 1), capped
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Run `operation`, retrying errors the error type classifies as retryable.
///
/// Retries are logged at `warn`.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    with_retry_by(policy, operation, Retryable::is_retryable, |error, attempt| {
        tracing::warn!(attempt, %error, "Retrying after retryable error");
    })
    .await
}

/// Run `operation` with an explicit classifier and retry callback.
///
/// The waits between attempts are plain `tokio::time::sleep`s, so wrapping the
/// whole call in `tokio::time::timeout` cancels a pending wait.
pub async fn with_retry_by<T, E, F, Fut, C, N>(
    policy: &RetryPolicy,
    mut operation: F,
    is_retryable: C,
    mut on_retry: N,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> bool,
    N: FnMut(&E, u32),
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) if attempt < policy.retries && is_retryable(&error) => {
                attempt += 1;
                on_retry(&error, attempt);
                let delay = policy.delay_for(attempt);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            Err(error) => return Err(error),
        }
    }
}
