//! Configuration management for Rategate.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

use crate::error::{RateGateError, Result};
use crate::ratelimit::AlgorithmKind;

/// Prefix for environment overrides, e.g. `RATEGATE__STORE__URL`.
const ENV_PREFIX: &str = "RATEGATE";

/// Main configuration for the Rategate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateGateConfig {
    /// State store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Leaky bucket parameters
    #[serde(default)]
    pub leaky_bucket: BucketConfig,

    /// Token bucket parameters
    #[serde(default)]
    pub token_bucket: BucketConfig,

    /// Algorithm active at startup
    #[serde(default)]
    pub default_algorithm: AlgorithmKind,
}

/// Which store implementation holds bucket state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Shared Redis server
    #[default]
    Redis,
    /// Process-local memory
    Memory,
}

/// State store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store implementation
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Deadline for a single store operation, in milliseconds
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: default_redis_url(),
            operation_timeout_ms: default_operation_timeout_ms(),
        }
    }
}

impl StoreConfig {
    /// The per-operation deadline as a `Duration`.
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_operation_timeout_ms() -> u64 {
    1000
}

/// Parameters of one bucket algorithm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketConfig {
    /// Maximum units the bucket holds
    #[serde(default = "default_capacity")]
    pub capacity: f64,

    /// Leak or refill rate, in units per second
    #[serde(default = "default_rate")]
    pub rate: f64,

    /// Expiry applied to every state write, in seconds (0 disables expiry)
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Whether a status read persists the refilled token count
    /// (token bucket only)
    #[serde(default = "default_refresh_on_status")]
    pub refresh_on_status: bool,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            rate: default_rate(),
            ttl_secs: default_ttl_secs(),
            refresh_on_status: default_refresh_on_status(),
        }
    }
}

fn default_capacity() -> f64 {
    10.0
}

fn default_rate() -> f64 {
    1.0
}

fn default_ttl_secs() -> u64 {
    3600
}

fn default_refresh_on_status() -> bool {
    true
}

impl BucketConfig {
    /// A bucket with the given capacity and rate and default TTL.
    pub fn new(capacity: f64, rate: f64) -> Self {
        Self {
            capacity,
            rate,
            ..Self::default()
        }
    }

    /// Override the state TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_secs = ttl.as_secs();
        self
    }

    /// Override whether status reads persist refreshed state.
    pub fn with_refresh_on_status(mut self, refresh: bool) -> Self {
        self.refresh_on_status = refresh;
        self
    }

    /// The state TTL as a `Duration` (zero means no expiry).
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Reject negative or non-finite parameters.
    pub fn validate(&self, name: &str) -> Result<()> {
        if !self.capacity.is_finite() || self.capacity < 0.0 {
            return Err(RateGateError::config(format!(
                "{}: capacity must be a non-negative number, got {}",
                name, self.capacity
            )));
        }
        if !self.rate.is_finite() || self.rate < 0.0 {
            return Err(RateGateError::config(format!(
                "{}: rate must be a non-negative number, got {}",
                name, self.rate
            )));
        }
        Ok(())
    }
}

impl RateGateConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: RateGateConfig = serde_yaml::from_str(yaml)
            .map_err(|e| RateGateError::config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional file layered with
    /// `RATEGATE__*` environment overrides.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            info!(path = %path, "Loading configuration file");
            builder = builder.add_source(config::File::with_name(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: RateGateConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| RateGateError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check both bucket configurations.
    pub fn validate(&self) -> Result<()> {
        self.leaky_bucket.validate("leaky_bucket")?;
        self.token_bucket.validate("token_bucket")
    }
}
