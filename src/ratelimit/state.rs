//! Encoding of per-key bucket state in the shared store.
//!
//! Each algorithm keeps two string entries per rate limit key:
//! a fill level and the Unix second of the last update.
//!
//! | Algorithm    | Level entry             | Time entry            |
//! |--------------|-------------------------|-----------------------|
//! | leaky bucket | `bucket:{key}:water`    | `bucket:{key}:time`   |
//! | token bucket | `token:{key}:tokens`    | `token:{key}:time`    |

use std::time::Duration;
use tracing::trace;

use crate::error::{RateGateError, Result};
use crate::store::StateStore;

/// Suffix shared by the timestamp entry of both algorithms.
const TIME_SUFFIX: &str = "time";

/// Naming scheme for one algorithm's store entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateKeys {
    prefix: &'static str,
    level_suffix: &'static str,
}

impl StateKeys {
    /// Entries written by the leaky bucket.
    pub const LEAKY_BUCKET: StateKeys = StateKeys {
        prefix: "bucket",
        level_suffix: "water",
    };

    /// Entries written by the token bucket.
    pub const TOKEN_BUCKET: StateKeys = StateKeys {
        prefix: "token",
        level_suffix: "tokens",
    };

    /// Store entry holding the fill level for `key`.
    pub fn level_key(&self, key: &str) -> String {
        format!("{}:{}:{}", self.prefix, key, self.level_suffix)
    }

    /// Store entry holding the last update time for `key`.
    pub fn time_key(&self, key: &str) -> String {
        format!("{}:{}:{}", self.prefix, key, TIME_SUFFIX)
    }

    /// Glob pattern matching every level entry of this algorithm.
    pub fn scan_pattern(&self) -> String {
        format!("{}:*:{}", self.prefix, self.level_suffix)
    }

    /// Recover the rate limit key from a level entry name.
    ///
    /// Keys may themselves contain `:` (e.g. `apikey:abc`), so only the
    /// outer prefix and suffix are stripped.
    pub fn key_from_level_entry<'a>(&self, entry: &'a str) -> Option<&'a str> {
        entry
            .strip_prefix(self.prefix)?
            .strip_prefix(':')?
            .strip_suffix(self.level_suffix)?
            .strip_suffix(':')
    }
}

/// The persisted pair for one key, with absent entries left as `None`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StoredBucket {
    /// Water level or token count
    pub level: Option<f64>,
    /// Unix seconds of the last write
    pub last_update: Option<i64>,
}

impl StoredBucket {
    /// Whether any state exists for the key.
    pub fn exists(&self) -> bool {
        self.level.is_some()
    }

    /// Read both entries for `key`. The level entry is read first; a failure
    /// there aborts without touching the time entry.
    pub async fn load(store: &dyn StateStore, keys: StateKeys, key: &str) -> Result<Self> {
        let level_key = keys.level_key(key);
        let level = store
            .get(&level_key)
            .await?
            .map(|raw| parse_level(&level_key, raw))
            .transpose()?;

        let time_key = keys.time_key(key);
        let last_update = store
            .get(&time_key)
            .await?
            .map(|raw| parse_timestamp(&time_key, raw))
            .transpose()?;

        trace!(key = %key, level = ?level, last_update = ?last_update, "Loaded bucket state");

        Ok(Self { level, last_update })
    }

    /// Persist `level` and `now` for `key` in one atomic write, refreshing
    /// the TTL of both entries.
    pub async fn save(
        store: &dyn StateStore,
        keys: StateKeys,
        key: &str,
        level: f64,
        now: i64,
        ttl: Duration,
    ) -> Result<()> {
        let entries = [
            (keys.level_key(key), format_level(level)),
            (keys.time_key(key), now.to_string()),
        ];
        store.set_many(&entries, ttl).await
    }

    /// Rate limit keys that currently have a level entry under `keys`.
    pub async fn tracked_keys(store: &dyn StateStore, keys: StateKeys) -> Result<Vec<String>> {
        let entries = store.keys(&keys.scan_pattern()).await?;
        Ok(entries
            .iter()
            .filter_map(|entry| keys.key_from_level_entry(entry))
            .map(str::to_string)
            .collect())
    }

    /// Delete both entries for `key` in one multi-key deletion.
    pub async fn delete(store: &dyn StateStore, keys: StateKeys, key: &str) -> Result<()> {
        store
            .delete_many(&[keys.level_key(key), keys.time_key(key)])
            .await
    }
}

/// Shortest decimal form of a level: `4.0` is written as `4`, `2.5` as `2.5`.
pub fn format_level(level: f64) -> String {
    level.to_string()
}

fn parse_level(entry: &str, raw: String) -> Result<f64> {
    match raw.trim().parse::<f64>() {
        Ok(level) if level.is_finite() => Ok(level),
        _ => Err(RateGateError::CorruptState {
            entry: entry.to_string(),
            value: raw,
        }),
    }
}

fn parse_timestamp(entry: &str, raw: String) -> Result<i64> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| RateGateError::CorruptState {
            entry: entry.to_string(),
            value: raw,
        })
}
