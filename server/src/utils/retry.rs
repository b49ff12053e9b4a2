//! Async retry utilities with fixed or exponential backoff

use std::time::Duration;

use crate::core::config::RetryBackoff;

/// How often and how patiently an operation is retried
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub retry_limit: u32,
    pub delay: Duration,
    pub backoff: RetryBackoff,
}

impl RetryPolicy {
    pub fn new(retry_limit: u32, delay: Duration, backoff: RetryBackoff) -> Self {
        Self {
            retry_limit,
            delay,
            backoff,
        }
    }

    /// Delay before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        match self.backoff {
            RetryBackoff::Fixed => self.delay,
            RetryBackoff::Exponential => self
                .delay
                .saturating_mul(2_u32.saturating_pow(retry.saturating_sub(1))),
        }
    }
}

/// Retry an async operation according to `policy`.
///
/// Returns the operation's value on success, or `Err((error, attempts))` with the
/// last error once the retry limit is spent.
pub async fn retry_async<F, Fut, T, E>(policy: RetryPolicy, mut operation: F) -> Result<T, (E, u32)>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempts > policy.retry_limit {
                    return Err((e, attempts));
                }
                let delay = policy.delay_for(attempts);
                tracing::warn!(
                    error = %e,
                    attempt = attempts,
                    delay_ms = delay.as_millis(),
                    "Retrying after transient error"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
