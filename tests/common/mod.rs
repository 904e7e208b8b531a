#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use workshop_cache::cache::{
    CacheConfig, CacheEntry, CacheManager, ConfigRepository, DurableCounts, DurableStore,
    ManagerSettings, PersistentTier, StatRecord, StatsStore,
};
use workshop_cache::infrastructure::{CacheError, CacheResult};
use workshop_cache::storage::InProcessStore;

/// A durable tier that can be switched into failing, hanging or slow reads.
#[derive(Default)]
pub struct FlakyStore {
    inner: InProcessStore,
    failing: AtomicBool,
    hanging: AtomicBool,
    read_delay_ms: AtomicU64,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_hanging(&self, hanging: bool) {
        self.hanging.store(hanging, Ordering::SeqCst);
    }

    /// Delays `get` after the row has been read, widening the window in which a
    /// removal can overtake the read.
    pub fn set_read_delay(&self, delay: Duration) {
        self.read_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &InProcessStore {
        &self.inner
    }

    async fn gate(&self) -> CacheResult<()> {
        if self.hanging.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(CacheError::tier_unavailable("durable", "connection refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl PersistentTier for FlakyStore {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn get(&self, key: &str) -> CacheResult<Option<CacheEntry>> {
        self.gate().await?;
        let entry = self.inner.get(key).await?;
        let delay = self.read_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(entry)
    }

    async fn upsert(&self, entry: &CacheEntry) -> CacheResult<()> {
        self.gate().await?;
        self.inner.upsert(entry).await
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        self.gate().await?;
        self.inner.delete(key).await
    }

    async fn delete_by_tag(&self, tag: &str) -> CacheResult<Vec<String>> {
        self.gate().await?;
        self.inner.delete_by_tag(tag).await
    }

    async fn delete_by_pattern(&self, pattern: &Regex) -> CacheResult<Vec<String>> {
        self.gate().await?;
        self.inner.delete_by_pattern(pattern).await
    }

    async fn delete_expired(&self, before: DateTime<Utc>) -> CacheResult<u64> {
        self.gate().await?;
        self.inner.delete_expired(before).await
    }

    async fn clear(&self) -> CacheResult<u64> {
        self.gate().await?;
        self.inner.clear().await
    }

    async fn counts(&self, now: DateTime<Utc>) -> CacheResult<DurableCounts> {
        self.gate().await?;
        self.inner.counts(now).await
    }
}

#[async_trait]
impl StatsStore for FlakyStore {
    async fn increment(&self, day: NaiveDate, namespace: &str, hits: u64, misses: u64) -> CacheResult<()> {
        self.gate().await?;
        self.inner.increment(day, namespace, hits, misses).await
    }

    async fn records(&self, from: NaiveDate, to: NaiveDate) -> CacheResult<Vec<StatRecord>> {
        self.gate().await?;
        self.inner.records(from, to).await
    }
}

#[async_trait]
impl ConfigRepository for FlakyStore {
    async fn load_config(&self, tenant: &str) -> CacheResult<Option<CacheConfig>> {
        self.gate().await?;
        self.inner.load_config(tenant).await
    }

    async fn save_config(&self, tenant: &str, config: &CacheConfig) -> CacheResult<()> {
        self.gate().await?;
        self.inner.save_config(tenant, config).await
    }
}

pub fn settings(max_memory_entries: usize) -> ManagerSettings {
    let mut settings = ManagerSettings::default();
    settings.defaults.max_memory_entries = max_memory_entries;
    settings.durable_timeout = Duration::from_millis(200);
    settings
}

pub fn manager_with(store: Arc<dyn DurableStore>, max_memory_entries: usize) -> CacheManager {
    CacheManager::new(settings(max_memory_entries), Some(store))
}

pub fn flaky_manager(max_memory_entries: usize) -> (CacheManager, Arc<FlakyStore>) {
    let store = Arc::new(FlakyStore::new());
    let manager = manager_with(store.clone(), max_memory_entries);
    (manager, store)
}
