//! Local approximation of the host's rate limit.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AbgError, Result};

/// Remaining calls in the current window plus when the window resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaBucket {
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    pub window_seconds: u64,
}

impl QuotaBucket {
    /// A full bucket whose window starts at `now`.
    #[must_use]
    pub fn new(limit: u32, window_seconds: u64, now: DateTime<Utc>) -> Self {
        Self {
            limit,
            remaining: limit,
            reset_at: now + window(window_seconds),
            window_seconds,
        }
    }

    /// Take one call from the bucket, or fail fast with the wait time.
    pub fn try_acquire(&mut self, now: DateTime<Utc>, endpoint: &str) -> Result<()> {
        if now >= self.reset_at {
            self.remaining = self.limit;
            self.reset_at = now + window(self.window_seconds);
        }
        if self.remaining == 0 {
            return Err(AbgError::RateLimit {
                retry_after_seconds: self.seconds_until_reset(now),
                endpoint: endpoint.to_string(),
            });
        }
        self.remaining -= 1;
        Ok(())
    }

    /// Drain the bucket until `reset_at`, after the host itself reported a limit.
    pub fn exhaust_until(&mut self, reset_at: DateTime<Utc>) {
        self.remaining = 0;
        if reset_at > self.reset_at {
            self.reset_at = reset_at;
        }
    }

    /// Whole seconds until reset, never less than one while still exhausted.
    #[must_use]
    pub fn seconds_until_reset(&self, now: DateTime<Utc>) -> u64 {
        let millis = (self.reset_at - now).num_milliseconds().max(0);
        u64::try_from(millis).unwrap_or(0).div_ceil(1000).max(1)
    }
}

const MAX_WINDOW_SECONDS: u64 = 366 * 24 * 3600;

fn window(seconds: u64) -> Duration {
    Duration::seconds(i64::try_from(seconds.min(MAX_WINDOW_SECONDS)).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decrements_until_exhausted() {
        let now = Utc::now();
        let mut bucket = QuotaBucket::new(2, 60, now);
        bucket.try_acquire(now, "github").unwrap();
        bucket.try_acquire(now, "github").unwrap();
        let err = bucket.try_acquire(now, "github").unwrap_err();
        let retry = err.retry_after_seconds().unwrap();
        assert!(retry > 0 && retry <= 60, "{retry}");
    }

    #[test]
    fn refills_after_reset() {
        let now = Utc::now();
        let mut bucket = QuotaBucket::new(1, 60, now);
        bucket.try_acquire(now, "github").unwrap();
        assert!(bucket.try_acquire(now, "github").is_err());
        let later = now + Duration::seconds(61);
        bucket.try_acquire(later, "github").unwrap();
        assert_eq!(bucket.remaining, 0);
    }

    #[test]
    fn host_reported_limit_extends_reset() {
        let now = Utc::now();
        let mut bucket = QuotaBucket::new(100, 60, now);
        bucket.exhaust_until(now + Duration::seconds(600));
        let err = bucket.try_acquire(now, "github").unwrap_err();
        assert!(err.retry_after_seconds().unwrap() > 500);
    }
}
