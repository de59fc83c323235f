//! Pacing for calls to external providers.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{Instant, sleep};
use tracing::debug;

use crate::models::LimitsConfig;

/// Bounds concurrent provider calls and spaces out their start times.
///
/// Cloning shares the underlying limits, so one limiter built by the caller
/// can be handed to every component that talks to the same provider.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    in_flight: Arc<Semaphore>,
    pacing: Arc<Mutex<Pacing>>,
}

#[derive(Debug)]
struct Pacing {
    interval: Option<Duration>,
    next_slot: Instant,
}

/// Held for the duration of one provider call.
#[derive(Debug)]
pub struct RatePermit {
    _permit: OwnedSemaphorePermit,
}

impl RateLimiter {
    pub fn new(max_in_flight: usize, requests_per_second: Option<f64>) -> Self {
        let interval = requests_per_second
            .filter(|rps| rps.is_finite() && *rps > 0.0)
            .map(|rps| Duration::from_secs_f64(1.0 / rps));

        Self {
            in_flight: Arc::new(Semaphore::new(max_in_flight.max(1))),
            pacing: Arc::new(Mutex::new(Pacing {
                interval,
                next_slot: Instant::now(),
            })),
        }
    }

    pub fn from_config(limits: &LimitsConfig) -> Self {
        Self::new(limits.max_in_flight as usize, limits.requests_per_second)
    }

    /// No pacing and effectively no concurrency bound.
    pub fn unlimited() -> Self {
        Self::new(Semaphore::MAX_PERMITS, None)
    }

    /// Wait for an in-flight slot and for the next start time.
    ///
    /// Returns `None` only if the limiter has been closed.
    pub async fn acquire(&self) -> Option<RatePermit> {
        let permit = self.in_flight.clone().acquire_owned().await.ok()?;

        let wait = {
            let mut pacing = self.pacing.lock().unwrap_or_else(|e| e.into_inner());
            let now = Instant::now();
            let start = pacing.next_slot.max(now);
            if let Some(interval) = pacing.interval {
                pacing.next_slot = start + interval;
            }
            start - now
        };

        if !wait.is_zero() {
            sleep(wait).await;
        }

        Some(RatePermit { _permit: permit })
    }

    /// Push the next call start out by `delay`, e.g. after a 429 from the provider.
    pub fn backoff(&self, delay: Duration) {
        let mut pacing = self.pacing.lock().unwrap_or_else(|e| e.into_inner());
        let until = Instant::now() + delay;
        if until > pacing.next_slot {
            debug!(delay_ms = delay.as_millis() as u64, "provider backoff");
            pacing.next_slot = until;
        }
    }

    pub fn available_permits(&self) -> usize {
        self.in_flight.available_permits()
    }

    /// Reject all pending and future acquisitions.
    pub fn close(&self) {
        self.in_flight.close();
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::from_config(&LimitsConfig::default())
    }
}
