//! Redis state store.
//!
//! Shares bucket state between every service instance pointed at the same
//! Redis server.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::RedisResult;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::error::{RateGateError, Result};
use crate::store::StateStore;

/// Entries requested per SCAN round trip.
const SCAN_BATCH: usize = 100;

/// Redis-backed state store.
pub struct RedisStore {
    /// Redis connection manager (reconnects on its own)
    conn: ConnectionManager,
    /// Upper bound on a single store operation
    timeout: Duration,
}

impl RedisStore {
    /// Connect to Redis.
    ///
    /// # Arguments
    ///
    /// * `url` - Redis connection URL (e.g., "redis://localhost:6379")
    /// * `timeout` - Deadline applied to every subsequent operation
    ///
    /// # Errors
    ///
    /// Returns a store error if the URL is invalid or the server is unreachable.
    pub async fn new(url: &str, timeout: Duration) -> Result<Self> {
        debug!(url = %url, "Connecting to Redis");

        let client = redis::Client::open(url)?;
        let conn = match tokio::time::timeout(timeout, ConnectionManager::new(client)).await {
            Ok(conn) => conn?,
            Err(_) => {
                return Err(RateGateError::store(format!(
                    "connecting to {} timed out after {:?}",
                    url, timeout
                )))
            }
        };

        info!(url = %url, "Connected to Redis");

        Ok(Self { conn, timeout })
    }

    /// Run one Redis round trip under the configured timeout.
    ///
    /// Dropping the returned future cancels the in-flight command.
    async fn run<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                warn!(op = op, error = %e, "Redis operation failed");
                Err(e.into())
            }
            Err(_) => {
                warn!(op = op, timeout = ?self.timeout, "Redis operation timed out");
                Err(RateGateError::store(format!(
                    "{} timed out after {:?}",
                    op, self.timeout
                )))
            }
        }
    }
}

#[async_trait]
impl StateStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        trace!(key = %key, "Redis GET");
        let mut conn = self.conn.clone();
        let cmd = redis::cmd("GET").arg(key).to_owned();
        self.run("GET", cmd.query_async::<Option<String>>(&mut conn))
            .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        trace!(key = %key, value = %value, ttl = ?ttl, "Redis SET");
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if !ttl.is_zero() {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        self.run("SET", cmd.query_async::<()>(&mut conn)).await
    }

    async fn set_many(&self, entries: &[(String, String)], ttl: Duration) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        trace!(entries = ?entries, ttl = ?ttl, "Redis SET pipeline");

        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, value) in entries {
            let cmd = pipe.cmd("SET").arg(key).arg(value);
            if !ttl.is_zero() {
                cmd.arg("PX").arg(ttl_millis(ttl));
            }
            cmd.ignore();
        }
        self.run("SET", pipe.query_async::<()>(&mut conn)).await
    }

    async fn delete_many(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        trace!(keys = ?keys, "Redis DEL pipeline");

        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        for key in keys {
            pipe.cmd("DEL").arg(key).ignore();
        }
        self.run("DEL", pipe.query_async::<()>(&mut conn)).await
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        trace!(pattern = %pattern, "Redis SCAN");

        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut found = Vec::new();

        loop {
            let cmd = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .to_owned();
            let (next, batch): (u64, Vec<String>) = self
                .run("SCAN", cmd.query_async::<(u64, Vec<String>)>(&mut conn))
                .await?;
            found.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return an entry more than once.
        found.sort_unstable();
        found.dedup();
        Ok(found)
    }

    fn store_type(&self) -> &'static str {
        "redis"
    }
}

/// `PX` argument for a non-zero TTL; sub-millisecond TTLs round up to 1.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    // Redis tests require a running Redis instance
    // Run with: cargo test -- --ignored

    use super::*;

    const URL: &str = "redis://127.0.0.1:6379";

    #[tokio::test]
    #[ignore = "Requires running Redis instance"]
    async fn test_redis_set_get_delete() {
        let store = RedisStore::new(URL, Duration::from_secs(1)).await.unwrap();
        let keys = vec![
            "bucket:redis-test:water".to_string(),
            "bucket:redis-test:time".to_string(),
        ];

        store.set(&keys[0], "3", Duration::from_secs(60)).await.unwrap();
        store.set(&keys[1], "1700000000", Duration::ZERO).await.unwrap();
        assert_eq!(store.get(&keys[0]).await.unwrap().as_deref(), Some("3"));

        let listed = store.keys("bucket:redis-test*:water").await.unwrap();
        assert_eq!(listed, vec![keys[0].clone()]);

        store.delete_many(&keys).await.unwrap();
        store.delete_many(&keys).await.unwrap();
        assert_eq!(store.get(&keys[0]).await.unwrap(), None);
        assert_eq!(store.get(&keys[1]).await.unwrap(), None);
    }

    #[tokio::test]
    #[ignore = "Requires running Redis instance"]
    async fn test_redis_set_many() {
        let store = RedisStore::new(URL, Duration::from_secs(1)).await.unwrap();
        let entries = vec![
            ("token:redis-pair-test:tokens".to_string(), "4".to_string()),
            ("token:redis-pair-test:time".to_string(), "1700000000".to_string()),
        ];

        store.set_many(&entries, Duration::from_secs(60)).await.unwrap();
        for (key, value) in &entries {
            assert_eq!(store.get(key).await.unwrap().as_ref(), Some(value));
        }

        let keys: Vec<String> = entries.into_iter().map(|(key, _)| key).collect();
        store.delete_many(&keys).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "Requires running Redis instance"]
    async fn test_redis_ttl_expiry() {
        let store = RedisStore::new(URL, Duration::from_secs(1)).await.unwrap();
        let key = "token:redis-ttl-test:tokens";

        store.set(key, "1", Duration::from_millis(50)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(store.get(key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_store_error() {
        let result = RedisStore::new("redis://127.0.0.1:1", Duration::from_millis(200)).await;
        assert!(matches!(result, Err(RateGateError::Store(_))));
    }
}
