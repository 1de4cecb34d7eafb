//! Leaky bucket admission.
//!
//! Every admitted request pours one unit of water into the bucket, and the
//! bucket drains continuously at `rate` units per second. A request is
//! admitted only while the drained level is strictly below capacity.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::config::BucketConfig;
use crate::error::Result;
use crate::store::StateStore;

use super::algorithm::{AlgorithmKind, Decision, RateLimitAlgorithm, Status};
use super::clock::{elapsed_secs, Clock, SystemClock};
use super::state::{StateKeys, StoredBucket};

/// Leaky bucket rate limiter over a shared state store.
pub struct LeakyBucket {
    /// Where per-key water levels live
    store: Arc<dyn StateStore>,
    /// Time source for drain computation
    clock: Arc<dyn Clock>,
    /// Capacity, leak rate and TTL
    config: BucketConfig,
}

impl LeakyBucket {
    /// Create a leaky bucket using the system clock.
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

    /// Maximum water level.
    pub fn capacity(&self) -> f64 {
        self.config.capacity
    }

    /// Units drained per second.
    pub fn leak_rate(&self) -> f64 {
        self.config.rate
    }

    /// Bucket parameters.
    pub fn config(&self) -> &BucketConfig {
        &self.config
    }

    /// Keys that currently have persisted state.
    pub async fn tracked_keys(&self) -> Result<Vec<String>> {
        StoredBucket::tracked_keys(self.store.as_ref(), StateKeys::LEAKY_BUCKET).await
    }

    /// Water level after draining for the time since the last update.
    ///
    /// An unseen key is an empty bucket.
    fn drained_level(&self, stored: &StoredBucket, now: i64) -> f64 {
        let level = stored.level.unwrap_or(0.0).max(0.0);
        let elapsed = elapsed_secs(now, stored.last_update.unwrap_or(now));
        (level - elapsed * self.config.rate).max(0.0)
    }
}

#[async_trait]
impl RateLimitAlgorithm for LeakyBucket {
    async fn allow(&self, key: &str) -> Result<Decision> {
        let now = self.clock.now();
        let stored = StoredBucket::load(self.store.as_ref(), StateKeys::LEAKY_BUCKET, key).await?;
        let level = self.drained_level(&stored, now);

        if level >= self.config.capacity {
            debug!(
                key = %key,
                level = level,
                capacity = self.config.capacity,
                "Leaky bucket full, request denied"
            );
            return Ok(Decision::deny());
        }

        let new_level = level + 1.0;
        StoredBucket::save(
            self.store.as_ref(),
            StateKeys::LEAKY_BUCKET,
            key,
            new_level,
            now,
            self.config.ttl(),
        )
        .await?;

        let remaining = (self.config.capacity - new_level).max(0.0);
        trace!(key = %key, level = new_level, remaining = remaining, "Leaky bucket: allowed");
        Ok(Decision::allow(remaining))
    }

    async fn reset(&self, key: &str) -> Result<()> {
        debug!(key = %key, "Resetting leaky bucket state");
        StoredBucket::delete(self.store.as_ref(), StateKeys::LEAKY_BUCKET, key).await
    }

    /// Read-only: the drained level is reported but never written back.
    async fn status(&self, key: &str) -> Result<Status> {
        let now = self.clock.now();
        let stored = StoredBucket::load(self.store.as_ref(), StateKeys::LEAKY_BUCKET, key).await?;
        let level = self.drained_level(&stored, now);
        let capacity = self.config.capacity;

        Ok(Status {
            key: key.to_string(),
            current: level.min(capacity),
            capacity,
            remaining: (capacity - level).max(0.0),
            rate: self.config.rate,
            is_limited: level >= capacity,
            algorithm: AlgorithmKind::LeakyBucket,
        })
    }
}
