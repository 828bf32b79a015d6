//! Leaky/token-bucket admission control over outbound calls to the remote
//! API. One bucket per `{user, tool, document}` triple (spec.md §4.1);
//! concurrent acquires on the same key serialize only long enough to update
//! that key's bucket, never blocking acquires on other keys, because the
//! map itself is a concurrent hash map (`dashmap`) and each entry carries
//! its own lock.

use std::time::{
    Duration,
    Instant,
};

use dashmap::DashMap;
use parking_lot::Mutex;
use sheet_common::config::RateLimiterConfig;
use sheet_errors::ErrorMetadata;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateKey {
    pub user_id: String,
    pub tool: String,
    pub document_id: Option<String>,
}

impl RateKey {
    pub fn new(user_id: impl Into<String>, tool: impl Into<String>, document_id: Option<String>) -> Self {
        Self { user_id: user_id.into(), tool: tool.into(), document_id }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Grant {
    Granted,
    Denied { retry_after: Duration },
}

struct Bucket {
    tokens: f64,
    capacity: f64,
    refill_per_second: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(capacity: f64, refill_per_second: f64) -> Self {
        Self { tokens: capacity, capacity, refill_per_second, last_refill: Instant::now() }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.refill_per_second).min(self.capacity);
            self.last_refill = now;
        }
    }

    fn try_take(&mut self, cost: f64, now: Instant) -> Grant {
        self.refill(now);
        if self.tokens >= cost {
            self.tokens -= cost;
            Grant::Granted
        } else {
            let deficit = cost - self.tokens;
            let seconds = if self.refill_per_second > 0.0 { deficit / self.refill_per_second } else { f64::MAX };
            Grant::Denied { retry_after: Duration::from_secs_f64(seconds.max(0.0)) }
        }
    }
}

pub struct RateLimiter {
    config: RateLimiterConfig,
    buckets: DashMap<RateKey, Mutex<Bucket>>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self { config, buckets: DashMap::new() }
    }

    fn bucket_for(&self, key: &RateKey) -> dashmap::mapref::one::Ref<'_, RateKey, Mutex<Bucket>> {
        if !self.buckets.contains_key(key) {
            self.buckets
                .entry(key.clone())
                .or_insert_with(|| Mutex::new(Bucket::new(self.config.burst as f64, self.config.refill_per_second)));
        }
        self.buckets.get(key).expect("just inserted")
    }

    /// Admit or delay a call under `key`'s budget. `cost` defaults to 1 for
    /// ordinary calls; expensive endpoints (full-document metadata reads)
    /// pass a higher cost.
    #[tracing::instrument(skip(self), fields(user = %key.user_id, tool = %key.tool))]
    pub async fn acquire(&self, key: &RateKey, cost: u32, deadline: Instant) -> anyhow::Result<()> {
        loop {
            let grant = {
                let bucket = self.bucket_for(key);
                let mut guard = bucket.lock();
                guard.try_take(cost as f64, Instant::now())
            };
            match grant {
                Grant::Granted => {
                    sheet_metrics::rate_limiter::log_granted(bucket_kind(key));
                    return Ok(());
                },
                Grant::Denied { retry_after } => {
                    sheet_metrics::rate_limiter::log_denied(bucket_kind(key));
                    let now = Instant::now();
                    if now >= deadline {
                        anyhow::bail!(ErrorMetadata::rate_limit(retry_after.as_millis() as u64));
                    }
                    let wait = retry_after.min(deadline.saturating_duration_since(now));
                    if wait.is_zero() {
                        anyhow::bail!(ErrorMetadata::rate_limit(retry_after.as_millis() as u64));
                    }
                    tokio::time::sleep(wait).await;
                },
            }
        }
    }

    /// Non-blocking check used by callers that want to fail fast with
    /// `retryAfterMs` rather than wait.
    pub fn try_acquire(&self, key: &RateKey, cost: u32) -> anyhow::Result<()> {
        let bucket = self.bucket_for(key);
        let mut guard = bucket.lock();
        match guard.try_take(cost as f64, Instant::now()) {
            Grant::Granted => {
                sheet_metrics::rate_limiter::log_granted(bucket_kind(key));
                Ok(())
            },
            Grant::Denied { retry_after } => {
                sheet_metrics::rate_limiter::log_denied(bucket_kind(key));
                anyhow::bail!(ErrorMetadata::rate_limit(retry_after.as_millis() as u64));
            },
        }
    }
}

fn bucket_kind(key: &RateKey) -> &'static str {
    if key.document_id.is_some() { "per_document" } else { "per_user" }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use sheet_errors::{
        ErrorKind,
        ErrorMetadataAnyhowExt,
    };

    use super::*;

    fn test_limiter(burst: u32, refill: f64) -> RateLimiter {
        RateLimiter::new(RateLimiterConfig { burst, sustained: burst, refill_per_second: refill })
    }

    #[tokio::test]
    async fn grants_up_to_capacity_then_denies() {
        let limiter = test_limiter(2, 0.0);
        let key = RateKey::new("u1", "read_range", None);
        limiter.try_acquire(&key, 1).unwrap();
        limiter.try_acquire(&key, 1).unwrap();
        let err = limiter.try_acquire(&key, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RateLimit);
    }

    #[tokio::test]
    async fn different_keys_are_independent() {
        let limiter = test_limiter(1, 0.0);
        let a = RateKey::new("u1", "read_range", None);
        let b = RateKey::new("u2", "read_range", None);
        limiter.try_acquire(&a, 1).unwrap();
        // b's bucket is untouched by a's exhaustion.
        limiter.try_acquire(&b, 1).unwrap();
    }

    #[tokio::test]
    async fn bucket_refills_over_time() {
        let limiter = test_limiter(1, 1000.0);
        let key = RateKey::new("u1", "read_range", None);
        limiter.try_acquire(&key, 1).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        limiter.try_acquire(&key, 1).unwrap();
    }

    #[tokio::test]
    async fn acquire_waits_up_to_deadline_then_succeeds() {
        let limiter = test_limiter(1, 1000.0);
        let key = RateKey::new("u1", "read_range", None);
        limiter.try_acquire(&key, 1).unwrap();
        let deadline = Instant::now() + Duration::from_millis(200);
        limiter.acquire(&key, 1, deadline).await.unwrap();
    }

    #[tokio::test]
    async fn acquire_fails_past_deadline() {
        let limiter = test_limiter(1, 0.01);
        let key = RateKey::new("u1", "read_range", None);
        limiter.try_acquire(&key, 1).unwrap();
        let deadline = Instant::now() + Duration::from_millis(5);
        let err = limiter.acquire(&key, 1, deadline).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RateLimit);
    }
}
