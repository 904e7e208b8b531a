use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};

use crate::cache::config_store::CacheConfig;
use crate::cache::entry::CacheEntry;
use crate::cache::persistent::{
    ConfigRepository, DurableCounts, PersistentTier, StatRecord, StatsStore,
};
use crate::infrastructure::error::CacheResult;

/// 进程内持久层实现
///
/// 与 SQLite 后端语义一致，但数据只存在于当前进程。用于测试、单机开发，
/// 以及未配置数据库时的默认后端。
#[derive(Debug, Default)]
pub struct InProcessStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
    stats: RwLock<BTreeMap<(NaiveDate, String), (u64, u64)>>,
    configs: RwLock<HashMap<String, CacheConfig>>,
}

impl InProcessStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前记录数（包括已过期但尚未清理的记录）
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 直接读取原始记录，不做过期判断
    pub fn raw(&self, key: &str) -> Option<CacheEntry> {
        self.entries.read().get(key).cloned()
    }

    fn remove_where<F>(&self, predicate: F) -> Vec<String>
    where
        F: Fn(&CacheEntry) -> bool,
    {
        let mut entries = self.entries.write();
        let doomed: Vec<String> = entries
            .values()
            .filter(|entry| predicate(entry))
            .map(|entry| entry.key.clone())
            .collect();
        for key in &doomed {
            entries.remove(key);
        }
        doomed
    }
}

#[async_trait]
impl PersistentTier for InProcessStore {
    fn name(&self) -> &'static str {
        "in-process"
    }

    async fn get(&self, key: &str) -> CacheResult<Option<CacheEntry>> {
        let now = Utc::now();
        Ok(self
            .entries
            .read()
            .get(key)
            .filter(|entry| entry.is_live_at(now))
            .cloned())
    }

    async fn upsert(&self, entry: &CacheEntry) -> CacheResult<()> {
        self.entries.write().insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        Ok(self.entries.write().remove(key).is_some())
    }

    async fn delete_by_tag(&self, tag: &str) -> CacheResult<Vec<String>> {
        Ok(self.remove_where(|entry| entry.has_tag(tag)))
    }

    async fn delete_by_pattern(&self, pattern: &Regex) -> CacheResult<Vec<String>> {
        Ok(self.remove_where(|entry| pattern.is_match(&entry.key)))
    }

    async fn delete_expired(&self, before: DateTime<Utc>) -> CacheResult<u64> {
        Ok(self.remove_where(|entry| entry.expires_at < before).len() as u64)
    }

    async fn clear(&self) -> CacheResult<u64> {
        let mut entries = self.entries.write();
        let count = entries.len() as u64;
        entries.clear();
        Ok(count)
    }

    async fn counts(&self, now: DateTime<Utc>) -> CacheResult<DurableCounts> {
        let entries = self.entries.read();
        let expired = entries.values().filter(|entry| !entry.is_live_at(now)).count();
        Ok(DurableCounts {
            total: entries.len() as u64,
            expired: expired as u64,
        })
    }
}

#[async_trait]
impl StatsStore for InProcessStore {
    async fn increment(&self, day: NaiveDate, namespace: &str, hits: u64, misses: u64) -> CacheResult<()> {
        let mut stats = self.stats.write();
        let bucket = stats.entry((day, namespace.to_string())).or_insert((0, 0));
        bucket.0 += hits;
        bucket.1 += misses;
        Ok(())
    }

    async fn records(&self, from: NaiveDate, to: NaiveDate) -> CacheResult<Vec<StatRecord>> {
        Ok(self
            .stats
            .read()
            .iter()
            .filter(|((day, _), _)| *day >= from && *day <= to)
            .map(|((day, namespace), (hits, misses))| StatRecord {
                day: *day,
                namespace: namespace.clone(),
                hits: *hits,
                misses: *misses,
            })
            .collect())
    }
}

#[async_trait]
impl ConfigRepository for InProcessStore {
    async fn load_config(&self, tenant: &str) -> CacheResult<Option<CacheConfig>> {
        Ok(self.configs.read().get(tenant).cloned())
    }

    async fn save_config(&self, tenant: &str, config: &CacheConfig) -> CacheResult<()> {
        self.configs.write().insert(tenant.to_string(), config.clone());
        Ok(())
    }
}
