use std::future::Future;
use std::time::Duration;

use harvest_logging::harvest_warn;

use crate::FetchError;

/// Exponential backoff for transient fetch failures (rate limits, 5xx, timeouts).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before the attempt following failed attempt number `attempt` (1-based),
    /// or `None` when the error is permanent or attempts are exhausted.
    pub fn delay_after(&self, attempt: u32, err: &FetchError) -> Option<Duration> {
        if attempt >= self.max_attempts || !err.is_transient() {
            return None;
        }
        let exponential = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        Some(err.retry_after.unwrap_or(exponential).min(self.max_delay))
    }

    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => match self.delay_after(attempt, &err) {
                    Some(delay) => {
                        harvest_warn!(
                            "{} failed ({}), retrying in {:?} (attempt {}/{})",
                            label,
                            err.kind,
                            delay,
                            attempt + 1,
                            self.max_attempts
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => return Err(err),
                },
            }
        }
    }
}
