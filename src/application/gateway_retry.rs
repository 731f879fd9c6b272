//! Bounded retries for gateway calls.
//!
//! A call is retried only on transient failures, and always with the same
//! idempotency key, so the processor deduplicates on its side.

use std::future::Future;
use std::time::Duration;

use crate::ports::{GatewayError, IdempotencyKey};

/// Exponential backoff settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay after the `attempt`-th failure (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(1_u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX))
    }

    /// Runs `call` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &'static str,
        key: &IdempotencyKey,
        mut call: F,
    ) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.retryable && attempt < self.max_attempts => {
                    let delay = self.delay(attempt);
                    tracing::warn!(
                        operation,
                        idempotency_key = %key,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient gateway failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.retryable {
                        tracing::error!(
                            operation,
                            idempotency_key = %key,
                            attempts = attempt,
                            error = %e,
                            alert = true,
                            "Gateway retries exhausted"
                        );
                    }
                    return Err(e);
                }
            }
        }
    }
}
