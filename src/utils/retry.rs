//! Exponential backoff for provider calls.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

/// How many times a provider call is attempted and how long to wait in between.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts in total, counting the first one. Never below 1.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Wait before retry number `retry` (1-based), capped at `max_delay`, without jitter.
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(16) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exp);
        Duration::from_secs_f64(secs).min(self.max_delay)
    }
}

/// Errors that may succeed when the same call is made again.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Run `operation` until it succeeds, fails permanently, or runs out of attempts.
///
/// `on_backoff` sees every delay before the sleep starts; provider clients
/// forward it to their [`RateLimiter`](crate::services::RateLimiter) so other
/// callers of the same provider back off too.
pub async fn with_retry<T, E, F, Fut, H>(
    config: &RetryConfig,
    mut operation: F,
    mut on_backoff: H,
) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    H: FnMut(Duration),
{
    let mut attempt = 1;
    loop {
        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if !error.is_retryable() {
            return Err(error);
        }
        if attempt >= config.max_attempts {
            warn!(attempts = attempt, error = %error, "giving up after retries");
            return Err(error);
        }

        let base = config.delay_for_attempt(attempt);
        let delay = base + jitter(base / 4);
        debug!(attempt, delay_ms = delay.as_millis() as u64, error = %error, "retrying");
        on_backoff(delay);
        sleep(delay).await;
        attempt += 1;
    }
}

/// Up to `max` of clock-derived jitter.
fn jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0);
    Duration::from_millis(nanos % max_ms)
}
