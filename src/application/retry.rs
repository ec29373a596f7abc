use anyhow::{Context, Result};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Linear backoff: the n-th retry waits `delay × n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Always at least 1.
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(5000))
    }
}

impl RetryPolicy {
    /// `max_retries` retries on top of the first attempt.
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self {
            attempts: max_retries.saturating_add(1),
            delay,
        }
    }

    /// No retries, no waiting. Used by tests and dry runs against fakes.
    pub fn none() -> Self {
        Self {
            attempts: 1,
            delay: Duration::ZERO,
        }
    }

    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < attempts => {
                    let wait = self.delay * attempt;
                    warn!(
                        operation = what,
                        attempt,
                        attempts,
                        wait_ms = wait.as_millis() as u64,
                        error = %e,
                        "attempt failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("{} failed after {} attempts", what, attempts))
                }
            }
        }
    }
}
