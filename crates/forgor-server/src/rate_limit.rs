//! Per-client token-bucket rate limiter.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Tracked clients are capped; past the cap all state is flushed and every
/// bucket refills from scratch.
// TODO: replace the full flush with LRU eviction by last access.
const MAX_TRACKED_CLIENTS: usize = 10_000;

#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<String, TokenBucket>>>,
    refill_per_second: f64,
    burst: f64,
}

struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new(refill_per_second: f64, burst: u32) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            refill_per_second,
            burst: burst as f64,
        }
    }

    pub fn allow(&self, client: &str) -> bool {
        let mut buckets = self.buckets.lock().unwrap();

        if buckets.len() > MAX_TRACKED_CLIENTS {
            buckets.clear();
        }

        let now = Instant::now();
        let bucket = buckets.entry(client.to_string()).or_insert(TokenBucket {
            tokens: self.burst,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_second).min(self.burst);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_then_deny() {
        let limiter = RateLimiter::new(0.0, 3);
        assert!(limiter.allow("a"));
        assert!(limiter.allow("a"));
        assert!(limiter.allow("a"));
        assert!(!limiter.allow("a"));

        // Separate clients have separate buckets.
        assert!(limiter.allow("b"));
    }
}
