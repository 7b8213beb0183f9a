//! Retry policy with exponential backoff.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{error, warn};

use crate::error::NodeError;

/// Bounded retry strategy for connection manager operations.
///
/// An operation is attempted up to `max_attempts` times. Between attempts the
/// policy sleeps for an exponentially growing delay, capped at `max_delay`.
/// Only errors accepted by `retry_on` are retried; anything else is returned
/// immediately.
#[derive(Clone, Copy)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Predicate selecting retryable errors.
    pub retry_on: fn(&NodeError) -> bool,
}

impl RetryPolicy {
    /// Policy for establishing the connection: 5 attempts, 2s doubling up to 10s.
    #[must_use]
    pub const fn connect() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            retry_on: NodeError::is_transient,
        }
    }

    /// Policy for send/receive: 3 attempts, 1s doubling up to 4s.
    #[must_use]
    pub const fn io() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(4),
            backoff_multiplier: 2.0,
            retry_on: NodeError::is_transient,
        }
    }

    /// Same schedule shape with different delays. Handy for tests and tight
    /// local setups.
    #[must_use]
    pub const fn with_delays(mut self, initial_delay: Duration, max_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self.max_delay = max_delay;
        self
    }

    /// Override the number of attempts.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Override the retryable-error predicate.
    #[must_use]
    pub const fn with_retry_on(mut self, retry_on: fn(&NodeError) -> bool) -> Self {
        self.retry_on = retry_on;
        self
    }

    /// Calculate the delay after the given failed attempt (1-based).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let delay_millis = (self.initial_delay.as_millis() as f64 * multiplier) as u64;
        Duration::from_millis(delay_millis).min(self.max_delay)
    }

    /// Check whether another attempt is allowed after `attempt` failures.
    #[must_use]
    pub const fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Run `op` under this policy.
    ///
    /// Returns the first success, the first non-retryable error, or the last
    /// error once attempts are exhausted.
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut op: F) -> Result<T, NodeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, NodeError>>,
    {
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !(self.retry_on)(&e) => return Err(e),
                Err(e) if !self.should_retry(attempt) => {
                    error!(
                        operation,
                        attempts = attempt,
                        error = %e,
                        "giving up after exhausting retries"
                    );
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient failure, retrying"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .finish_non_exhaustive()
    }
}
