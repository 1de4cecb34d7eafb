//! Shared state store backends.
//!
//! Bucket state lives outside the process so that every service instance
//! enforces the same limit for a key:
//!
//! - **Redis**: shared storage for multi-instance deployments
//! - **Memory**: DashMap-backed storage for a single process and for tests

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{StoreBackend, StoreConfig};
use crate::error::{RateGateError, Result};

/// Key-value operations the rate limiting algorithms need from a store.
///
/// Implementations must not retry: every failure is surfaced to the caller
/// as a store error.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read a value, `None` if the entry is absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value. A zero `ttl` means the entry never expires.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Atomically write all `(key, value)` entries with the same `ttl`.
    /// Either every entry is written or none is.
    async fn set_many(&self, entries: &[(String, String)], ttl: Duration) -> Result<()>;

    /// Atomically delete all `keys`. Deleting absent entries succeeds.
    async fn delete_many(&self, keys: &[String]) -> Result<()>;

    /// List entry names matching a glob `pattern` (`*` matches any run of characters).
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// Store type name for logging.
    fn store_type(&self) -> &'static str;
}

/// Build the store selected by configuration.
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn StateStore>> {
    match config.backend {
        StoreBackend::Redis => {
            let store = RedisStore::new(&config.url, config.operation_timeout()).await?;
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
    }
}

/// Compile a glob `pattern`, where `*` matches any run of characters, into
/// an anchored regex.
pub(crate) fn glob_regex(pattern: &str) -> Result<Regex> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("(?s)^{}$", body))
        .map_err(|e| RateGateError::store(format!("invalid key pattern '{}': {}", pattern, e)))
}
