//! Local sliding window rate limiting, keyed by client IP.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Structure of a limiter.
#[derive(Debug)]
pub struct RateLimiter {
    /// Requests allowed per window.
    maximum_request: usize,
    /// Window duration.
    time: Duration,
    /// Each key has its own window.
    buckets: DashMap<String, VecDeque<Instant>>,
    /// Key on `X-Forwarded-For` rather than the peer address.
    trust_proxy: bool,
}

impl RateLimiter {
    /// Create a new rate limiter. This can be used for each route.
    pub fn new(maximum_request: usize, time: Duration) -> Self {
        RateLimiter {
            maximum_request,
            time,
            buckets: DashMap::new(),
            trust_proxy: false,
        }
    }

    /// Only enable behind a reverse proxy that overwrites `X-Forwarded-For`.
    pub fn trust_proxy(mut self, trust_proxy: bool) -> Self {
        self.trust_proxy = trust_proxy;
        self
    }

    pub fn trusts_proxy(&self) -> bool {
        self.trust_proxy
    }

    /// Checks if a new request exceeds the limit. If not, records it.
    pub fn check(&self, key: &str) -> bool {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> bool {
        let mut requests = self.buckets.entry(key.to_owned()).or_default();

        // Clean old requests.
        while let Some(time) = requests.front() {
            if now.duration_since(*time) >= self.time {
                requests.pop_front();
            } else {
                break;
            }
        }

        if requests.len() >= self.maximum_request {
            false
        } else {
            requests.push_back(now);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_slides() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        let start = Instant::now();

        assert!(limiter.check_at("10.0.0.1", start));
        assert!(limiter.check_at("10.0.0.1", start + Duration::from_secs(1)));
        assert!(!limiter.check_at("10.0.0.1", start + Duration::from_secs(2)));
        // Other clients are not affected.
        assert!(limiter.check_at("10.0.0.2", start + Duration::from_secs(2)));

        // First request left the window.
        assert!(limiter.check_at("10.0.0.1", start + Duration::from_secs(60)));
        assert!(!limiter.check_at("10.0.0.1", start + Duration::from_secs(60)));
    }
}
