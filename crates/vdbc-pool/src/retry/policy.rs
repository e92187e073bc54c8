//! Caller-side retry of exhausted borrows
//!
//! The pool never retries on its own. Callers that prefer waiting longer over
//! failing fast wrap their borrow in a [`RetryPolicy`].

use std::future::Future;

use vdbc_core::Result;

use super::BackoffStrategy;

/// Configuration for retrying a borrow that timed out
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt (0 = no retry)
    max_attempts: u32,
    /// Backoff strategy for delays between retries
    backoff: BackoffStrategy,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: BackoffStrategy) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// A policy that never retries
    pub fn none() -> Self {
        Self::new(0, BackoffStrategy::default())
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> &BackoffStrategy {
        &self.backoff
    }

    /// Run `operation`, retrying while it fails with a retryable error.
    ///
    /// Non-retryable errors (creation failures, a closed pool) are returned
    /// immediately.
    pub async fn run<T, Fut, Op>(&self, key: &str, mut operation: Op) -> Result<T>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;

        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        log_event(key, &RetryEvent::Succeeded {
                            attempts_taken: attempt + 1,
                        });
                    }
                    return Ok(value);
                }
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.backoff.calculate_delay(attempt);
                    log_event(key, &RetryEvent::Failed {
                        attempt: attempt + 1,
                        error: err.to_string(),
                    });
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    log_event(key, &RetryEvent::Attempting {
                        attempt: attempt + 1,
                        max_attempts: self.max_attempts + 1,
                    });
                }
                Err(err) => {
                    if err.is_retryable() {
                        log_event(key, &RetryEvent::Exhausted {
                            total_attempts: attempt + 1,
                        });
                    }
                    return Err(err);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, BackoffStrategy::default())
    }
}

/// Retry progress, reported through `tracing`
#[derive(Debug, Clone, PartialEq)]
pub enum RetryEvent {
    /// A retry is starting
    Attempting { attempt: u32, max_attempts: u32 },
    /// A retry succeeded
    Succeeded { attempts_taken: u32 },
    /// An attempt failed with a retryable error
    Failed { attempt: u32, error: String },
    /// All attempts used up
    Exhausted { total_attempts: u32 },
}

fn log_event(key: &str, event: &RetryEvent) {
    match event {
        RetryEvent::Exhausted { .. } => tracing::warn!(key = %key, ?event, "borrow retries exhausted"),
        _ => tracing::debug!(key = %key, ?event, "borrow retry"),
    }
}
