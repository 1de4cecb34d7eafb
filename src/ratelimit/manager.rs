//! Runtime-switchable selection between the two bucket algorithms.

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::RateGateConfig;
use crate::error::Result;
use crate::store::StateStore;

use super::algorithm::{AlgorithmKind, Decision, RateLimitAlgorithm, Status};
use super::leaky_bucket::LeakyBucket;
use super::token_bucket::TokenBucket;

/// The algorithm instance a call was resolved to.
///
/// Cloning is cheap; a resolved handle keeps pointing at the same algorithm
/// even if the manager is switched afterwards.
#[derive(Clone)]
pub enum ActiveLimiter {
    /// Leak-based admission
    LeakyBucket(Arc<LeakyBucket>),
    /// Refill-based admission
    TokenBucket(Arc<TokenBucket>),
}

impl ActiveLimiter {
    /// Which algorithm this handle dispatches to.
    pub fn kind(&self) -> AlgorithmKind {
        match self {
            ActiveLimiter::LeakyBucket(_) => AlgorithmKind::LeakyBucket,
            ActiveLimiter::TokenBucket(_) => AlgorithmKind::TokenBucket,
        }
    }

    /// Keys with persisted state for this algorithm.
    pub async fn tracked_keys(&self) -> Result<Vec<String>> {
        match self {
            ActiveLimiter::LeakyBucket(limiter) => limiter.tracked_keys().await,
            ActiveLimiter::TokenBucket(limiter) => limiter.tracked_keys().await,
        }
    }
}

#[async_trait]
impl RateLimitAlgorithm for ActiveLimiter {
    async fn allow(&self, key: &str) -> Result<Decision> {
        match self {
            ActiveLimiter::LeakyBucket(limiter) => limiter.allow(key).await,
            ActiveLimiter::TokenBucket(limiter) => limiter.allow(key).await,
        }
    }

    async fn reset(&self, key: &str) -> Result<()> {
        match self {
            ActiveLimiter::LeakyBucket(limiter) => limiter.reset(key).await,
            ActiveLimiter::TokenBucket(limiter) => limiter.reset(key).await,
        }
    }

    async fn status(&self, key: &str) -> Result<Status> {
        match self {
            ActiveLimiter::LeakyBucket(limiter) => limiter.status(key).await,
            ActiveLimiter::TokenBucket(limiter) => limiter.status(key).await,
        }
    }
}

/// Descriptor of the active algorithm for operators and dashboards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlgorithmInfo {
    /// Active algorithm
    pub current: AlgorithmKind,
    /// Bucket capacity
    pub capacity: f64,
    /// Leak or refill rate, units per second
    pub rate: f64,
    /// `"leak_rate"` or `"refill_rate"`
    pub rate_name: &'static str,
    /// One-line explanation of the admission rule
    pub description: &'static str,
}

/// Holds both algorithms and dispatches to the one currently selected.
///
/// Each manager owns its own selector, so independent managers (for example
/// one per test) never observe each other's switches.
pub struct LimiterManager {
    leaky_bucket: Arc<LeakyBucket>,
    token_bucket: Arc<TokenBucket>,
    current: RwLock<AlgorithmKind>,
}

impl LimiterManager {
    /// Create a manager with `initial` selected.
    pub fn new(leaky_bucket: LeakyBucket, token_bucket: TokenBucket, initial: AlgorithmKind) -> Self {
        Self {
            leaky_bucket: Arc::new(leaky_bucket),
            token_bucket: Arc::new(token_bucket),
            current: RwLock::new(initial),
        }
    }

    /// Build both algorithms over `store` from service configuration.
    pub fn from_config(store: Arc<dyn StateStore>, config: &RateGateConfig) -> Self {
        debug!(
            store = store.store_type(),
            default_algorithm = %config.default_algorithm,
            "Creating limiter manager"
        );
        Self::new(
            LeakyBucket::new(store.clone(), config.leaky_bucket.clone()),
            TokenBucket::new(store, config.token_bucket.clone()),
            config.default_algorithm,
        )
    }

    /// The selected algorithm.
    pub fn current_algorithm(&self) -> AlgorithmKind {
        *self.current.read()
    }

    /// Switch by operator-supplied name.
    ///
    /// Returns `false`, leaving the selection untouched, unless `name` is
    /// `"leaky_bucket"` or `"token_bucket"`.
    pub fn set_algorithm(&self, name: &str) -> bool {
        match AlgorithmKind::from_name(name) {
            Some(kind) => {
                self.switch_to(kind);
                true
            }
            None => {
                warn!(algorithm = %name, "Rejected unknown algorithm name");
                false
            }
        }
    }

    /// Switch to `kind`. Calls that already resolved their algorithm finish
    /// against it.
    pub fn switch_to(&self, kind: AlgorithmKind) {
        let previous = std::mem::replace(&mut *self.current.write(), kind);
        if previous != kind {
            info!(from = %previous, to = %kind, "Switched rate limiting algorithm");
        }
    }

    /// Resolve the selected algorithm.
    pub fn active(&self) -> ActiveLimiter {
        match *self.current.read() {
            AlgorithmKind::LeakyBucket => ActiveLimiter::LeakyBucket(self.leaky_bucket.clone()),
            AlgorithmKind::TokenBucket => ActiveLimiter::TokenBucket(self.token_bucket.clone()),
        }
    }

    /// The leaky bucket instance, regardless of selection.
    pub fn leaky_bucket(&self) -> &Arc<LeakyBucket> {
        &self.leaky_bucket
    }

    /// The token bucket instance, regardless of selection.
    pub fn token_bucket(&self) -> &Arc<TokenBucket> {
        &self.token_bucket
    }

    /// Configuration of the selected algorithm.
    pub fn algorithm_info(&self) -> AlgorithmInfo {
        let current = self.current_algorithm();
        match current {
            AlgorithmKind::LeakyBucket => AlgorithmInfo {
                current,
                capacity: self.leaky_bucket.capacity(),
                rate: self.leaky_bucket.leak_rate(),
                rate_name: "leak_rate",
                description: "Requests add water; water leaks at constant rate. Full bucket = blocked.",
            },
            AlgorithmKind::TokenBucket => AlgorithmInfo {
                current,
                capacity: self.token_bucket.capacity(),
                rate: self.token_bucket.refill_rate(),
                rate_name: "refill_rate",
                description: "Tokens refill at constant rate; requests consume tokens. No tokens = blocked.",
            },
        }
    }

    /// Keys with persisted state under the selected algorithm.
    pub async fn list_keys(&self) -> Result<Vec<String>> {
        self.active().tracked_keys().await
    }

    /// Status of every tracked key under the selected algorithm.
    ///
    /// Keys whose status cannot be read are skipped; only a failure to
    /// enumerate keys is an error.
    pub async fn list_statuses(&self) -> Result<Vec<Status>> {
        let limiter = self.active();
        let keys = limiter.tracked_keys().await?;
        let results = join_all(keys.iter().map(|key| limiter.status(key))).await;

        Ok(keys
            .iter()
            .zip(results)
            .filter_map(|(key, result)| match result {
                Ok(status) => Some(status),
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping key with unreadable status");
                    None
                }
            })
            .collect())
    }
}

#[async_trait]
impl RateLimitAlgorithm for LimiterManager {
    async fn allow(&self, key: &str) -> Result<Decision> {
        self.active().allow(key).await
    }

    async fn reset(&self, key: &str) -> Result<()> {
        self.active().reset(key).await
    }

    async fn status(&self, key: &str) -> Result<Status> {
        self.active().status(key).await
    }
}
