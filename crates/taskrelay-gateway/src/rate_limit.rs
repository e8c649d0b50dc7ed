//! Fixed-window rate limiter keyed by client.
//!
//! Not internally synchronized; the admission gateway holds it under the same
//! lock as the idempotency cache.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Per-client window state.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitCounter {
    pub window_count: u32,
    pub window_expires_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimited {
    pub limit: u32,
    pub retry_after: Duration,
}

impl RateLimited {
    /// Whole seconds, rounded up, never zero.
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.retry_after.as_secs() + u64::from(self.retry_after.subsec_nanos() > 0);
        secs.max(1)
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    counters: HashMap<String, RateLimitCounter>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            counters: HashMap::new(),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Reject if the client's live window is already full. Does not count the request.
    pub fn check(&self, client_key: &str, now: Instant) -> Result<(), RateLimited> {
        match self.counters.get(client_key) {
            Some(c) if now < c.window_expires_at && c.window_count >= self.limit => Err(RateLimited {
                limit: self.limit,
                retry_after: c.window_expires_at - now,
            }),
            _ => Ok(()),
        }
    }

    /// Count one accepted request, opening a new window if the old one elapsed.
    pub fn record(&mut self, client_key: &str, now: Instant) {
        let window = self.window;
        let counter = self
            .counters
            .entry(client_key.to_string())
            .or_insert(RateLimitCounter {
                window_count: 0,
                window_expires_at: now + window,
            });
        if now >= counter.window_expires_at {
            counter.window_count = 0;
            counter.window_expires_at = now + window;
        }
        counter.window_count = counter.window_count.saturating_add(1);
    }

    pub fn counter(&self, client_key: &str) -> Option<RateLimitCounter> {
        self.counters.get(client_key).copied()
    }

    /// Drop elapsed windows. Returns how many were removed.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let before = self.counters.len();
        self.counters.retain(|_, c| now < c.window_expires_at);
        before - self.counters.len()
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_reached_rejects_without_counting() {
        let mut limiter = RateLimiter::new(3, Duration::from_secs(60));
        let now = Instant::now();
        for _ in 0..3 {
            assert!(limiter.check("c1", now).is_ok());
            limiter.record("c1", now);
        }
        let rejected = limiter.check("c1", now + Duration::from_secs(10)).unwrap_err();
        assert_eq!(rejected.limit, 3);
        assert_eq!(rejected.retry_after, Duration::from_secs(50));
        assert_eq!(rejected.retry_after_secs(), 50);
        assert_eq!(limiter.counter("c1").unwrap().window_count, 3);
        // Other clients are unaffected
        assert!(limiter.check("c2", now).is_ok());
    }

    #[test]
    fn test_window_resets() {
        let mut limiter = RateLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();
        limiter.record("c1", now);
        assert!(limiter.check("c1", now).is_err());

        let later = now + Duration::from_secs(60);
        assert!(limiter.check("c1", later).is_ok());
        limiter.record("c1", later);
        let counter = limiter.counter("c1").unwrap();
        assert_eq!(counter.window_count, 1);
        assert_eq!(counter.window_expires_at, later + Duration::from_secs(60));
    }

    #[test]
    fn test_sweep_drops_elapsed_windows() {
        let mut limiter = RateLimiter::new(5, Duration::from_secs(60));
        let now = Instant::now();
        limiter.record("old", now);
        limiter.record("new", now + Duration::from_secs(30));
        assert_eq!(limiter.sweep(now + Duration::from_secs(61)), 1);
        assert!(limiter.counter("old").is_none());
        assert_eq!(limiter.len(), 1);
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let r = RateLimited {
            limit: 1,
            retry_after: Duration::from_millis(1200),
        };
        assert_eq!(r.retry_after_secs(), 2);
        let r = RateLimited {
            limit: 1,
            retry_after: Duration::ZERO,
        };
        assert_eq!(r.retry_after_secs(), 1);
    }
}
