//! Exponential backoff retry for the network steps of a delivery.
//!
//! Errors are not classified: every failure triggers another attempt until
//! the policy gives up, and each attempt re-invokes the whole operation.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

/// Backoff policy. At least one of `max_elapsed` / `max_attempts` must be set,
/// otherwise a permanently failing operation would never return.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub initial_interval: Duration,
    /// Growth factor applied to the delay after every failed attempt.
    pub multiplier: f64,
    /// Cap for a single delay.
    pub max_interval: Duration,
    /// Give up once this much time has passed since the first attempt.
    pub max_elapsed: Option<Duration>,
    /// Give up after this many attempts (including the first one).
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            multiplier: 1.5,
            max_interval: Duration::from_secs(60),
            max_elapsed: Some(Duration::from_secs(300)),
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given failed attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let secs = self.initial_interval.as_secs_f64() * factor;
        let capped = secs.min(self.max_interval.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    fn attempts_exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }

    /// Whether sleeping `delay` more would cross the elapsed-time ceiling.
    fn elapsed_exhausted(&self, elapsed: Duration, delay: Duration) -> bool {
        self.max_elapsed
            .is_some_and(|max| elapsed.saturating_add(delay) > max)
    }
}

/// Run `operation` until it succeeds or `policy` gives up, returning the
/// last error in the latter case.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, name: &str, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let started = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        let err = match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(operation = name, attempts = attempt + 1, "Succeeded after retrying");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        let delay = policy.delay_for_attempt(attempt);
        attempt += 1;

        if policy.attempts_exhausted(attempt) || policy.elapsed_exhausted(started.elapsed(), delay)
        {
            warn!(
                operation = name,
                attempts = attempt,
                elapsed_ms = started.elapsed().as_millis() as u64,
                error = %err,
                "Giving up after retries"
            );
            return Err(err);
        }

        debug!(
            operation = name,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Retrying after failure"
        );
        tokio::time::sleep(delay).await;
    }
}
