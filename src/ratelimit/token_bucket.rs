//! Token bucket admission.
//!
//! The bucket holds up to `capacity` tokens and refills at `rate` tokens per
//! second. Each admitted request consumes one token; a request is admitted
//! only when at least one whole token is available after refilling.
//!
//! Unlike the leaky bucket, an unseen key starts with a full bucket.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::config::BucketConfig;
use crate::error::Result;
use crate::store::StateStore;

use super::algorithm::{AlgorithmKind, Decision, RateLimitAlgorithm, Status};
use super::clock::{elapsed_secs, Clock, SystemClock};
use super::state::{StateKeys, StoredBucket};

/// Token bucket rate limiter over a shared state store.
pub struct TokenBucket {
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    config: BucketConfig,
}

impl TokenBucket {
    /// Create a token bucket using the system clock.
    pub fn new(store: Arc<dyn StateStore>, config: BucketConfig) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Maximum number of tokens.
    pub fn capacity(&self) -> f64 {
        self.config.capacity
    }

    /// Tokens added per second.
    pub fn refill_rate(&self) -> f64 {
        self.config.rate
    }

    /// Bucket parameters.
    pub fn config(&self) -> &BucketConfig {
        &self.config
    }

    /// Keys that currently have persisted state.
    pub async fn tracked_keys(&self) -> Result<Vec<String>> {
        StoredBucket::tracked_keys(self.store.as_ref(), StateKeys::TOKEN_BUCKET).await
    }

    /// Tokens available after refilling for the time since the last update,
    /// never more than capacity.
    fn refilled_tokens(&self, stored: &StoredBucket, now: i64) -> f64 {
        let capacity = self.config.capacity;
        let tokens = stored.level.unwrap_or(capacity).max(0.0);
        let elapsed = elapsed_secs(now, stored.last_update.unwrap_or(now));
        (tokens + elapsed * self.config.rate).min(capacity)
    }
}

#[async_trait]
impl RateLimitAlgorithm for TokenBucket {
    async fn allow(&self, key: &str) -> Result<Decision> {
        let now = self.clock.now();
        let stored = StoredBucket::load(self.store.as_ref(), StateKeys::TOKEN_BUCKET, key).await?;
        let tokens = self.refilled_tokens(&stored, now);

        if tokens < 1.0 {
            debug!(key = %key, tokens = tokens, "Token bucket empty, request denied");
            return Ok(Decision::deny());
        }

        let remaining = tokens - 1.0;
        StoredBucket::save(
            self.store.as_ref(),
            StateKeys::TOKEN_BUCKET,
            key,
            remaining,
            now,
            self.config.ttl(),
        )
        .await?;

        trace!(key = %key, remaining = remaining, "Token bucket: allowed");
        Ok(Decision::allow(remaining))
    }

    async fn reset(&self, key: &str) -> Result<()> {
        debug!(key = %key, "Resetting token bucket state");
        StoredBucket::delete(self.store.as_ref(), StateKeys::TOKEN_BUCKET, key).await
    }

    /// Reports usage as tokens consumed (`capacity - tokens`).
    ///
    /// With `refresh_on_status` enabled, a key that already has state and
    /// has accrued refill since its last update gets the refilled count
    /// persisted. That write also refreshes the TTL. It is best effort: a
    /// failed refresh is logged and the snapshot is still returned.
    async fn status(&self, key: &str) -> Result<Status> {
        let now = self.clock.now();
        let stored = StoredBucket::load(self.store.as_ref(), StateKeys::TOKEN_BUCKET, key).await?;
        let tokens = self.refilled_tokens(&stored, now);
        let elapsed = elapsed_secs(now, stored.last_update.unwrap_or(now));

        if self.config.refresh_on_status && stored.exists() && elapsed > 0.0 {
            debug!(key = %key, tokens = tokens, "Persisting refilled tokens on status read");
            if let Err(e) = StoredBucket::save(
                self.store.as_ref(),
                StateKeys::TOKEN_BUCKET,
                key,
                tokens,
                now,
                self.config.ttl(),
            )
            .await
            {
                warn!(key = %key, error = %e, "Failed to persist refilled tokens");
            }
        }

        let capacity = self.config.capacity;
        Ok(Status {
            key: key.to_string(),
            current: (capacity - tokens).max(0.0),
            capacity,
            remaining: tokens,
            rate: self.config.rate,
            is_limited: tokens < 1.0,
            algorithm: AlgorithmKind::TokenBucket,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use crate::store::testing::{CountingStore, FailingStore};
    use crate::store::MemoryStore;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    const T0: i64 = 1_700_000_000;

    fn bucket(capacity: f64, rate: f64) -> (TokenBucket, Arc<MemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(T0));
        let limiter = TokenBucket::new(store.clone(), BucketConfig::new(capacity, rate))
            .with_clock(clock.clone());
        (limiter, store, clock)
    }

    async fn seed(store: &MemoryStore, key: &str, tokens: &str, time: i64) {
        store
            .set(&format!("token:{}:tokens", key), tokens, Duration::ZERO)
            .await
            .unwrap();
        store
            .set(&format!("token:{}:time", key), &time.to_string(), Duration::ZERO)
            .await
            .unwrap();
    }

    #[test]
    fn test_accessors() {
        let limiter = TokenBucket::new(Arc::new(MemoryStore::new()), BucketConfig::new(10.0, 2.0));
        assert_eq!(limiter.capacity(), 10.0);
        assert_eq!(limiter.refill_rate(), 2.0);
        assert_eq!(limiter.config().ttl(), Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn test_first_request_starts_full() {
        let (limiter, store, _) = bucket(5.0, 1.0);

        let decision = assert_ok!(limiter.allow("test_token_key").await);
        assert_eq!(decision, Decision::allow(4.0));
        assert_eq!(
            store.get("token:test_token_key:tokens").await.unwrap().as_deref(),
            Some("4")
        );
    }

    #[tokio::test]
    async fn test_empty_bucket_denied_without_write() {
        let store = Arc::new(CountingStore::default());
        let limiter = TokenBucket::new(store.clone(), BucketConfig::new(5.0, 1.0))
            .with_clock(Arc::new(ManualClock::new(T0)));
        seed(&store.inner, "empty", "0", T0).await;

        assert_eq!(limiter.allow("empty").await.unwrap(), Decision::deny());
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn test_refill_over_time() {
        let (limiter, store, _) = bucket(5.0, 1.0);
        // Empty 3 seconds ago: 0 + 3 refilled - 1 consumed = 2
        seed(&store, "refill", "0", T0 - 3).await;

        assert_eq!(limiter.allow("refill").await.unwrap(), Decision::allow(2.0));
        assert_eq!(
            store.get("token:refill:tokens").await.unwrap().as_deref(),
            Some("2")
        );
    }

    #[tokio::test]
    async fn test_refill_capped_at_capacity() {
        let (limiter, store, _) = bucket(5.0, 1.0);
        // min(4 + 10, 5) - 1 = 4
        seed(&store, "cap", "4", T0 - 10).await;

        assert_eq!(limiter.allow("cap").await.unwrap(), Decision::allow(4.0));
    }

    #[tokio::test]
    async fn test_burst_then_deny() {
        let (limiter, _, clock) = bucket(3.0, 1.0);

        for expected in [2.0, 1.0, 0.0] {
            assert_eq!(limiter.allow("burst").await.unwrap(), Decision::allow(expected));
        }
        assert_eq!(limiter.allow("burst").await.unwrap(), Decision::deny());

        clock.advance(1);
        assert_eq!(limiter.allow("burst").await.unwrap(), Decision::allow(0.0));
    }

    #[tokio::test]
    async fn test_fractional_tokens_below_one_denied() {
        let (limiter, store, _) = bucket(5.0, 0.5);
        seed(&store, "frac", "0", T0 - 1).await;

        // 0.5 tokens available
        assert!(!limiter.allow("frac").await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_no_refill_rate_never_recovers() {
        let (limiter, _, clock) = bucket(1.0, 0.0);

        assert!(limiter.allow("k").await.unwrap().allowed);
        clock.advance(86_400);
        assert!(!limiter.allow("k").await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_store_error_denies() {
        let limiter = TokenBucket::new(Arc::new(FailingStore), BucketConfig::new(5.0, 1.0));

        let err = assert_err!(limiter.allow("k").await);
        assert!(err.is_store());
    }

    #[tokio::test]
    async fn test_reset_restores_full_bucket() {
        let (limiter, store, _) = bucket(2.0, 0.0);
        limiter.allow("k").await.unwrap();
        limiter.allow("k").await.unwrap();
        assert!(!limiter.allow("k").await.unwrap().allowed);

        assert_ok!(limiter.reset("k").await);
        assert_ok!(limiter.reset("k").await);
        assert!(store.is_empty());

        assert_eq!(limiter.allow("k").await.unwrap(), Decision::allow(1.0));
    }

    #[tokio::test]
    async fn test_status() {
        let (limiter, store, _) = bucket(10.0, 2.0);
        seed(&store, "status", "7", T0).await;

        let status = limiter.status("status").await.unwrap();
        assert_eq!(status.key, "status");
        assert_eq!(status.current, 3.0);
        assert_eq!(status.capacity, 10.0);
        assert_eq!(status.remaining, 7.0);
        assert_eq!(status.rate, 2.0);
        assert!(!status.is_limited);
        assert_eq!(status.algorithm, AlgorithmKind::TokenBucket);
    }

    #[tokio::test]
    async fn test_status_limited() {
        let (limiter, store, _) = bucket(5.0, 1.0);
        seed(&store, "limited", "0", T0).await;

        let status = limiter.status("limited").await.unwrap();
        assert_eq!(status.current, 5.0);
        assert_eq!(status.remaining, 0.0);
        assert!(status.is_limited);
    }

    #[tokio::test]
    async fn test_status_of_unseen_key_is_full_and_not_persisted() {
        let (limiter, store, _) = bucket(5.0, 1.0);

        let status = limiter.status("nobody").await.unwrap();
        assert_eq!(status.current, 0.0);
        assert_eq!(status.remaining, 5.0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_status_refreshes_persisted_tokens() {
        let store = Arc::new(CountingStore::default());
        let clock = Arc::new(ManualClock::new(T0));
        let limiter = TokenBucket::new(store.clone(), BucketConfig::new(10.0, 1.0))
            .with_clock(clock.clone());
        seed(&store.inner, "k", "2", T0).await;

        // No time has passed: nothing to persist
        limiter.status("k").await.unwrap();
        assert_eq!(store.writes(), 0);

        clock.advance(3);
        let status = limiter.status("k").await.unwrap();
        assert_eq!(status.remaining, 5.0);
        assert_eq!(store.writes(), 2);
        assert_eq!(store.get("token:k:tokens").await.unwrap().as_deref(), Some("5"));
        assert_eq!(
            store.get("token:k:time").await.unwrap(),
            Some((T0 + 3).to_string())
        );
    }

    #[tokio::test]
    async fn test_status_read_only_when_refresh_disabled() {
        let store = Arc::new(CountingStore::default());
        let clock = Arc::new(ManualClock::new(T0 + 3));
        let config = BucketConfig::new(10.0, 1.0).with_refresh_on_status(false);
        let limiter = TokenBucket::new(store.clone(), config).with_clock(clock);
        seed(&store.inner, "k", "2", T0).await;

        let status = limiter.status("k").await.unwrap();
        assert_eq!(status.remaining, 5.0);
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn test_status_refresh_failure_is_not_fatal() {
        let store = Arc::new(CountingStore::default());
        let clock = Arc::new(ManualClock::new(T0 + 3));
        let limiter = TokenBucket::new(store.clone(), BucketConfig::new(10.0, 1.0))
            .with_clock(clock);
        seed(&store.inner, "k", "2", T0).await;
        store.fail_writes(true);

        let status = assert_ok!(limiter.status("k").await);
        assert_eq!(status.remaining, 5.0);
    }

    #[tokio::test]
    async fn test_tokens_never_exceed_capacity() {
        let (limiter, store, clock) = bucket(4.0, 3.0);
        seed(&store, "k", "3.5", T0).await;

        for step in [0, 1, 7, 1_000] {
            clock.advance(step);
            let status = limiter.status("k").await.unwrap();
            assert!(status.remaining <= status.capacity);
            assert!((status.current + status.remaining - status.capacity).abs() < 1e-9);
        }
        let decision = limiter.allow("k").await.unwrap();
        assert!(decision.remaining <= 4.0);
    }
}
