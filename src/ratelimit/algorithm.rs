//! The admission algorithm contract shared by both bucket variants.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{RateGateError, Result};

/// Identifies one of the two admission algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmKind {
    /// Requests add water, the bucket drains at a constant rate.
    #[default]
    LeakyBucket,
    /// Tokens refill at a constant rate, requests consume them.
    TokenBucket,
}

impl AlgorithmKind {
    /// The literal name used by operators and in status snapshots.
    pub fn as_str(&self) -> &'static str {
        match self {
            AlgorithmKind::LeakyBucket => "leaky_bucket",
            AlgorithmKind::TokenBucket => "token_bucket",
        }
    }

    /// Parse an operator-supplied name, returning `None` for anything unrecognized.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "leaky_bucket" => Some(AlgorithmKind::LeakyBucket),
            "token_bucket" => Some(AlgorithmKind::TokenBucket),
            _ => None,
        }
    }
}

impl fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlgorithmKind {
    type Err = RateGateError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s).ok_or_else(|| {
            RateGateError::config(format!(
                "unknown algorithm '{}', expected 'leaky_bucket' or 'token_bucket'",
                s
            ))
        })
    }
}

/// Outcome of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Capacity left after this check (0 when denied)
    pub remaining: f64,
}

impl Decision {
    /// An admitted request with the given remaining capacity.
    pub fn allow(remaining: f64) -> Self {
        Self {
            allowed: true,
            remaining,
        }
    }

    /// A denied request.
    pub fn deny() -> Self {
        Self {
            allowed: false,
            remaining: 0.0,
        }
    }
}

/// Algorithm-agnostic snapshot of a key's bucket.
///
/// `current + remaining == capacity` holds for every snapshot produced by
/// either algorithm.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Status {
    /// The rate limit key
    pub key: String,
    /// Capacity in use (water level, or tokens already consumed)
    pub current: f64,
    /// Maximum capacity
    pub capacity: f64,
    /// Capacity still available
    pub remaining: f64,
    /// Leak rate or refill rate, in units per second
    pub rate: f64,
    /// Whether the next request would be denied
    pub is_limited: bool,
    /// Which algorithm produced this snapshot
    pub algorithm: AlgorithmKind,
}

/// Trait implemented by every admission algorithm.
///
/// The limiter manager implements it too, so callers can hold either a
/// single algorithm or the switchable manager.
#[async_trait]
pub trait RateLimitAlgorithm: Send + Sync {
    /// Check whether one request for `key` is admitted, updating shared state.
    ///
    /// Store failures are returned as errors; no state is written when the
    /// read fails.
    async fn allow(&self, key: &str) -> Result<Decision>;

    /// Delete all persisted state for `key`.
    async fn reset(&self, key: &str) -> Result<()>;

    /// Report the current bucket state for `key`.
    async fn status(&self, key: &str) -> Result<Status>;
}
