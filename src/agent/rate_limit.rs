//! Minimum interval between emitted responses.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Process-wide throttle. Requests over the limit are dropped, never queued.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    last_emission: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emission: Mutex::new(None),
        }
    }

    /// Claim an emission slot at `now`.
    ///
    /// Check and update happen under one lock, so of two simultaneous callers
    /// at most one is allowed.
    pub fn allow(&self, now: Instant) -> bool {
        let mut last = self
            .last_emission
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = *last
            && now.saturating_duration_since(previous) < self.interval
        {
            return false;
        }
        *last = Some(now);
        true
    }
}
