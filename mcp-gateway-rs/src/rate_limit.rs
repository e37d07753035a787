//! Per-caller token-bucket rate limiting.
//!
//! Buckets refill continuously and lazily at each admission check; there is
//! no background timer. The bucket table is bounded: past `max_buckets` the
//! least-recently-seen caller is evicted and starts fresh if it returns.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use metrics::counter;
use serde::Serialize;
use tracing::debug;

/// Rejection returned when a caller is out of tokens.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimited {
    /// Seconds until enough tokens will have refilled for the request
    pub retry_after_seconds: f64,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
    last_seen: Instant,
}

/// Token-bucket admission control keyed by caller identity.
///
/// A single mutex guards the table; per-caller updates are linearized and
/// the critical section is a few arithmetic operations.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    refill_rate_per_second: f64,
    max_buckets: usize,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(capacity: u32, refill_rate_per_second: f64, max_buckets: usize) -> Self {
        Self {
            capacity: capacity as f64,
            refill_rate_per_second,
            max_buckets,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Tries to take `cost` tokens for the caller. Refills first, then
    /// either admits or rejects with a retry-after hint.
    pub fn try_acquire(&self, caller_id: &str, cost: f64) -> Result<(), RateLimited> {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().unwrap();

        let bucket = buckets.entry(caller_id.to_string()).or_insert_with(|| Bucket {
            tokens: self.capacity,
            last_refill: now,
            last_seen: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_rate_per_second).min(self.capacity);
        bucket.last_refill = now;
        bucket.last_seen = now;

        let admitted = if bucket.tokens >= cost {
            bucket.tokens -= cost;
            true
        } else {
            false
        };

        if buckets.len() > self.max_buckets {
            Self::evict_lru(&mut buckets, caller_id);
        }

        if admitted {
            Ok(())
        } else {
            debug!(caller = %caller_id, "Rate limit exceeded, request rejected");
            counter!("rate_limit_rejections", 1, "caller" => caller_id.to_string());
            Err(RateLimited {
                retry_after_seconds: cost / self.refill_rate_per_second,
            })
        }
    }

    /// Number of callers currently tracked.
    pub fn tracked_callers(&self) -> usize {
        self.buckets.lock().unwrap().len()
    }

    fn evict_lru(buckets: &mut HashMap<String, Bucket>, keep: &str) {
        let victim = buckets
            .iter()
            .filter(|(id, _)| id.as_str() != keep)
            .min_by_key(|(_, bucket)| bucket.last_seen)
            .map(|(id, _)| id.clone());

        if let Some(victim) = victim {
            debug!(caller = %victim, "Evicting least-recently-seen rate limit bucket");
            buckets.remove(&victim);
        }
    }
}
