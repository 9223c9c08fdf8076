//! Per-user token buckets for message sends and typing events.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use farmlink_shared::UserId;
use tokio::sync::Mutex;
use tracing::warn;

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    fn try_consume(&mut self, rate: f64, capacity: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;

        self.tokens = (self.tokens + elapsed * rate).min(capacity);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<UserId, TokenBucket>>>,
    rate: f64,
    capacity: f64,
}

impl RateLimiter {
    pub fn new(rate: f64, capacity: f64) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            rate,
            capacity,
        }
    }

    pub async fn check(&self, user: &UserId) -> bool {
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry(user.clone())
            .or_insert_with(|| TokenBucket::new(self.capacity));
        let allowed = bucket.try_consume(self.rate, self.capacity);
        if !allowed {
            warn!(user = %user, "Rate limit exceeded");
        }
        allowed
    }

    pub async fn purge_stale(&self, max_idle_secs: f64) {
        let mut buckets = self.buckets.lock().await;
        let now = Instant::now();
        buckets.retain(|_, bucket| {
            now.duration_since(bucket.last_refill).as_secs_f64() < max_idle_secs
        });
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(5.0, 20.0)
    }
}
