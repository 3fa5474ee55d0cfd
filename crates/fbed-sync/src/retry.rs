//! Bounded retry with decimal backoff.
//!
//! Attempt n (1-based) that fails with a retryable error waits
//! `base * 10^(n-1)`, capped at `max_wait`, before attempt n+1.

use fbed_core::config::TransportConfig;
use fbed_core::FbedResult;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base: Duration,
    pub max_wait: Duration,
}

impl RetryPolicy {
    /// `retry` in the transport config counts retries after the first attempt.
    pub fn from_config(transport: &TransportConfig) -> Self {
        RetryPolicy {
            max_attempts: transport.retry.saturating_add(1),
            base: transport.sleep(),
            max_wait: transport.max_wait(),
        }
    }

    /// Single attempt, no waiting.
    pub fn none() -> Self {
        RetryPolicy {
            max_attempts: 1,
            base: Duration::ZERO,
            max_wait: Duration::ZERO,
        }
    }

    pub fn should_retry<T>(&self, attempt: u32, outcome: &FbedResult<T>) -> bool {
        match outcome {
            Ok(_) => false,
            Err(e) => e.is_retryable() && attempt < self.max_attempts,
        }
    }

    pub fn next_delay(&self, attempt: u32) -> Duration {
        let factor = 10u32
            .checked_pow(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .unwrap_or(self.max_wait)
            .min(self.max_wait)
    }

    /// Drive `op` until it succeeds, fails permanently, or runs out of
    /// attempts. `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> FbedResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = FbedResult<T>>,
    {
        let mut attempt = 1;
        loop {
            let outcome = op(attempt).await;
            if !self.should_retry(attempt, &outcome) {
                if attempt > 1 && outcome.is_ok() {
                    info!(what, attempt, "succeeded after retry");
                }
                return outcome;
            }
            let delay = self.next_delay(attempt);
            if let Err(e) = &outcome {
                warn!(what, attempt, delay = ?delay, error = %e, "attempt failed, retrying");
            }
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
