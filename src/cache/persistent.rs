use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::cache::config_store::CacheConfig;
use crate::cache::entry::CacheEntry;
use crate::infrastructure::error::CacheResult;

/// Row counts for the durable tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurableCounts {
    pub total: u64,
    pub expired: u64,
}

/// Durable, cross-instance key -> entry store.
///
/// Implementations only persist; lazy-expiry semantics are applied by callers
/// through `get`, which must not return a record whose `expires_at` has passed
/// even if the row still exists.
#[async_trait]
pub trait PersistentTier: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns the live entry for `key`, if any.
    async fn get(&self, key: &str) -> CacheResult<Option<CacheEntry>>;

    async fn upsert(&self, entry: &CacheEntry) -> CacheResult<()>;

    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Removes every record carrying `tag`, returning the removed keys.
    async fn delete_by_tag(&self, tag: &str) -> CacheResult<Vec<String>>;

    /// Removes every record whose key matches `pattern`, returning the removed keys.
    async fn delete_by_pattern(&self, pattern: &Regex) -> CacheResult<Vec<String>>;

    /// Removes records with `expires_at < before`.
    async fn delete_expired(&self, before: DateTime<Utc>) -> CacheResult<u64>;

    async fn clear(&self) -> CacheResult<u64>;

    async fn counts(&self, now: DateTime<Utc>) -> CacheResult<DurableCounts>;

    async fn health_check(&self) -> CacheResult<bool> {
        Ok(true)
    }
}

/// Persisted hit/miss bucket for one `(day, namespace)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatRecord {
    pub day: NaiveDate,
    pub namespace: String,
    pub hits: u64,
    pub misses: u64,
}

impl StatRecord {
    /// Storage key, `"<day>:<namespace>"`.
    pub fn key(&self) -> String {
        stat_key(self.day, &self.namespace)
    }
}

pub fn stat_key(day: NaiveDate, namespace: &str) -> String {
    format!("{}:{}", day.format("%Y-%m-%d"), namespace)
}

/// Storage for stat buckets. Buckets are created on first increment.
#[async_trait]
pub trait StatsStore: Send + Sync {
    async fn increment(&self, day: NaiveDate, namespace: &str, hits: u64, misses: u64) -> CacheResult<()>;

    /// Buckets with `from <= day <= to`.
    async fn records(&self, from: NaiveDate, to: NaiveDate) -> CacheResult<Vec<StatRecord>>;
}

/// Storage for per-tenant cache configuration.
#[async_trait]
pub trait ConfigRepository: Send + Sync {
    async fn load_config(&self, tenant: &str) -> CacheResult<Option<CacheConfig>>;

    async fn save_config(&self, tenant: &str, config: &CacheConfig) -> CacheResult<()>;
}

/// Everything a durable backend provides.
pub trait DurableStore: PersistentTier + StatsStore + ConfigRepository {}

impl<T> DurableStore for T where T: PersistentTier + StatsStore + ConfigRepository {}

/// Runs a durable-tier call under `timeout`; an elapsed timer becomes `CacheError::Timeout`.
pub async fn bounded<T, F>(operation: &str, timeout: std::time::Duration, call: F) -> CacheResult<T>
where
    F: std::future::Future<Output = CacheResult<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(crate::infrastructure::error::CacheError::timeout(
            operation,
            timeout.as_millis() as u64,
        )),
    }
}
