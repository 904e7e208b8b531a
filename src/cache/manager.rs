use bytes::Bytes;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::config_store::{duration_ms, CacheConfig, CacheConfigPatch, ConfigStore};
use crate::cache::entry::{CacheEntry, CacheSource};
use crate::cache::janitor::Janitor;
use crate::cache::memory::MemoryTier;
use crate::cache::persistent::{bounded, DurableStore};
use crate::cache::sources::SourceRecords;
use crate::cache::stats::{StatKind, StatsRecorder, StatsSummary};
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::error::{CacheError, CacheResult};
use crate::storage::memory::InProcessStore;

/// Process-level knobs for a `CacheManager`.
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub defaults: CacheConfig,
    pub durable_timeout: Duration,
    pub stats_capacity: usize,
    pub page_size: usize,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            defaults: CacheConfig::default(),
            durable_timeout: Duration::from_secs(3),
            stats_capacity: 1024,
            page_size: 100,
        }
    }
}

impl ManagerSettings {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            defaults: config.cache.tenant_defaults(),
            durable_timeout: config.cache.durable_timeout(),
            stats_capacity: config.stats.channel_capacity,
            page_size: config.warmup.page_size,
        }
    }
}

/// Which tiers a read may consult.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetOptions {
    pub use_memory: bool,
    pub use_durable: bool,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self {
            use_memory: true,
            use_durable: true,
        }
    }
}

impl GetOptions {
    pub fn memory_only() -> Self {
        Self {
            use_memory: true,
            use_durable: false,
        }
    }

    pub fn durable_only() -> Self {
        Self {
            use_memory: false,
            use_durable: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetOptions {
    /// Falls back to the tenant's `default_ttl`.
    pub ttl: Option<Duration>,
    pub tags: Vec<String>,
    pub use_memory: bool,
    pub use_durable: bool,
    pub tenant: Option<String>,
}

impl Default for SetOptions {
    fn default() -> Self {
        Self {
            ttl: None,
            tags: Vec::new(),
            use_memory: true,
            use_durable: true,
            tenant: None,
        }
    }
}

impl SetOptions {
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    pub fn memory_only(mut self) -> Self {
        self.use_durable = false;
        self
    }

    pub fn durable_only(mut self) -> Self {
        self.use_memory = false;
        self
    }
}

/// A value served by one of the tiers.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit {
    pub key: String,
    pub value: Bytes,
    pub source: CacheSource,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheHit {
    fn new(entry: CacheEntry, source: CacheSource) -> Self {
        Self {
            key: entry.key,
            value: entry.value,
            source,
            created_at: entry.created_at,
            expires_at: entry.expires_at,
        }
    }
}

/// Result of one tier's share of a write or removal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum TierOutcome {
    Applied,
    Skipped,
    Failed(String),
}

impl TierOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TierOutcome::Applied)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TierOutcome::Failed(_))
    }

    /// Folds two outcomes of the same tier: a failure sticks, then any application.
    fn combine(self, other: TierOutcome) -> TierOutcome {
        match (self, other) {
            (failed @ TierOutcome::Failed(_), _) | (_, failed @ TierOutcome::Failed(_)) => failed,
            (TierOutcome::Applied, _) | (_, TierOutcome::Applied) => TierOutcome::Applied,
            _ => TierOutcome::Skipped,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetAck {
    pub key: String,
    pub timestamp: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(with = "duration_ms")]
    pub ttl: Duration,
    pub memory: TierOutcome,
    pub durable: TierOutcome,
}

/// Count of removed keys plus what each tier did. The count is advisory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovalOutcome {
    pub count: u64,
    pub memory: TierOutcome,
    pub durable: TierOutcome,
}

impl RemovalOutcome {
    fn empty() -> Self {
        Self {
            count: 0,
            memory: TierOutcome::Skipped,
            durable: TierOutcome::Skipped,
        }
    }

    pub fn found(&self) -> bool {
        self.count > 0
    }

    fn merge(self, other: RemovalOutcome) -> Self {
        Self {
            count: self.count + other.count,
            memory: self.memory.combine(other.memory),
            durable: self.durable.combine(other.durable),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClearScope {
    Memory,
    #[serde(alias = "database")]
    Durable,
    #[default]
    All,
}

impl ClearScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClearScope::Memory => "memory",
            ClearScope::Durable => "durable",
            ClearScope::All => "all",
        }
    }

    fn includes_memory(&self) -> bool {
        matches!(self, ClearScope::Memory | ClearScope::All)
    }

    fn includes_durable(&self) -> bool {
        matches!(self, ClearScope::Durable | ClearScope::All)
    }
}

impl FromStr for ClearScope {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(ClearScope::Memory),
            "durable" | "database" => Ok(ClearScope::Durable),
            "all" => Ok(ClearScope::All),
            other => Err(CacheError::invalid_argument(
                format!("unknown clear scope `{}`", other),
                Some("scope"),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySnapshot {
    pub size: usize,
    pub max_size: usize,
    pub usage_pct: f64,
    pub evictions: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DurableSnapshot {
    /// False when the durable tier is absent or could not be counted.
    pub available: bool,
    pub total: u64,
    pub expired: u64,
    pub active: u64,
    pub hit_rate: f64,
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub memory: MemorySnapshot,
    pub durable: DurableSnapshot,
    pub timestamp: DateTime<Utc>,
}

/// Two-tier cache facade.
///
/// Reads consult the memory tier first and fall back to the durable tier,
/// promoting durable hits into memory. Writes go to each enabled tier
/// independently; a failing durable tier degrades the cache to memory-only
/// instead of failing the call, unless no tier is left to serve it.
pub struct CacheManager {
    memory: Arc<MemoryTier>,
    durable: Option<Arc<dyn DurableStore>>,
    configs: ConfigStore,
    stats: StatsRecorder,
    sources: Option<Arc<dyn SourceRecords>>,
    timeout: Duration,
    page_size: usize,
}

impl CacheManager {
    /// Builds the manager and spawns its stats writer; must run inside a Tokio runtime.
    ///
    /// Without a durable store, tenant configs and stats are kept in process.
    pub fn new(settings: ManagerSettings, durable: Option<Arc<dyn DurableStore>>) -> Self {
        let backing: Arc<dyn DurableStore> = match &durable {
            Some(store) => Arc::clone(store),
            None => Arc::new(InProcessStore::new()),
        };

        let memory = Arc::new(MemoryTier::new(settings.defaults.max_memory_entries));
        let stats = StatsRecorder::spawn(
            Arc::clone(&backing),
            settings.stats_capacity,
            settings.durable_timeout,
        );
        let configs = ConfigStore::new(backing, settings.defaults, settings.durable_timeout);

        Self {
            memory,
            durable,
            configs,
            stats,
            sources: None,
            timeout: settings.durable_timeout,
            page_size: settings.page_size.max(1),
        }
    }

    pub fn with_sources(mut self, sources: Arc<dyn SourceRecords>) -> Self {
        self.sources = Some(sources);
        self
    }

    pub fn memory(&self) -> &Arc<MemoryTier> {
        &self.memory
    }

    pub fn recorder(&self) -> &StatsRecorder {
        &self.stats
    }

    pub async fn get(&self, key: &str, options: GetOptions) -> CacheResult<Option<CacheHit>> {
        let key = require_key(key)?;
        let defaults = self.configs.defaults();
        let use_memory = options.use_memory && defaults.enable_memory_tier;
        let durable = self
            .durable
            .as_ref()
            .filter(|_| options.use_durable && defaults.enable_durable_tier);

        if !use_memory && durable.is_none() {
            return Err(CacheError::tier_unavailable(
                "all",
                "no cache tier enabled for read",
            ));
        }

        let epoch = self.memory.removal_epoch();
        if use_memory {
            if let Some(entry) = self.memory.get(key) {
                self.stats.record_for_key(key, StatKind::Hit);
                return Ok(Some(CacheHit::new(entry, CacheSource::Memory)));
            }
        }

        if let Some(store) = durable {
            match bounded("durable get", self.timeout, store.get(key)).await {
                Ok(Some(entry)) if !entry.is_expired() => {
                    // A removal that ran while the durable read was in flight wins.
                    if use_memory && !self.memory.insert_if_epoch(entry.clone(), epoch) {
                        debug!(key, "Skipped promotion, entry changed during durable read");
                    }
                    self.stats.record_for_key(key, StatKind::Hit);
                    return Ok(Some(CacheHit::new(entry, CacheSource::Durable)));
                }
                Ok(_) => {}
                Err(e) if use_memory => {
                    warn!(key, error = %e, "Durable tier unavailable, answering from memory only");
                }
                Err(e) => return Err(e),
            }
        }

        self.stats.record_for_key(key, StatKind::Miss);
        Ok(None)
    }

    pub async fn set(
        &self,
        key: &str,
        value: impl Into<Bytes>,
        options: SetOptions,
    ) -> CacheResult<SetAck> {
        let key = require_key(key)?;
        let config = self.configs.get(options.tenant.as_deref()).await;
        let ttl = options.ttl.unwrap_or(config.default_ttl);
        if ttl.is_zero() {
            return Err(CacheError::invalid_argument(
                "ttl must be greater than 0",
                Some("ttl"),
            ));
        }

        let entry = CacheEntry::new(key, value, ttl)
            .with_tags(options.tags.into_iter().filter(|tag| !tag.is_empty()))
            .with_owner(options.tenant);

        let memory = if options.use_memory && config.enable_memory_tier {
            if let Some(evicted) = self.memory.insert(entry.clone()) {
                debug!(key, evicted = %evicted, "Memory tier full, evicted oldest entry");
            }
            TierOutcome::Applied
        } else {
            TierOutcome::Skipped
        };

        let durable = match self.durable.as_ref() {
            Some(store) if options.use_durable && config.enable_durable_tier => {
                match bounded("durable upsert", self.timeout, store.upsert(&entry)).await {
                    Ok(()) => TierOutcome::Applied,
                    Err(e) => {
                        warn!(key, error = %e, "Durable write failed");
                        TierOutcome::Failed(e.to_string())
                    }
                }
            }
            _ => TierOutcome::Skipped,
        };

        if !memory.is_applied() && !durable.is_applied() {
            return Err(match durable {
                TierOutcome::Failed(reason) => CacheError::tier_unavailable("durable", reason),
                _ => CacheError::tier_unavailable("all", "no cache tier enabled for write"),
            });
        }

        debug!(key, ttl_ms = ttl.as_millis() as u64, "Cache entry written");
        Ok(SetAck {
            key: entry.key,
            timestamp: entry.created_at,
            expires_at: entry.expires_at,
            ttl,
            memory,
            durable,
        })
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        match self.get(key, GetOptions::default()).await? {
            Some(hit) => Ok(Some(serde_json::from_slice(&hit.value)?)),
            None => Ok(None),
        }
    }

    pub async fn set_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        options: SetOptions,
    ) -> CacheResult<SetAck> {
        let bytes = serde_json::to_vec(value)?;
        self.set(key, bytes, options).await
    }

    pub async fn delete(&self, key: &str) -> CacheResult<RemovalOutcome> {
        let key = require_key(key)?;
        let (durable_keys, durable) = settle(
            "durable delete",
            self.timeout,
            self.durable.as_ref().map(|store| async move {
                store
                    .delete(key)
                    .await
                    .map(|removed| if removed { vec![key.to_string()] } else { Vec::new() })
            }),
        )
        .await;
        let in_memory = self.memory.delete(key);

        let memory_keys = if in_memory { vec![key.to_string()] } else { Vec::new() };
        Ok(RemovalOutcome {
            count: distinct(memory_keys, durable_keys),
            memory: TierOutcome::Applied,
            durable,
        })
    }

    /// Removes every key matching the regular expression `pattern`.
    pub async fn delete_by_pattern(&self, pattern: &str) -> CacheResult<RemovalOutcome> {
        if pattern.is_empty() {
            return Err(CacheError::missing("pattern"));
        }
        let regex = Regex::new(pattern)?;

        let (durable_keys, durable) = settle(
            "durable pattern delete",
            self.timeout,
            self.durable.as_ref().map(|store| store.delete_by_pattern(&regex)),
        )
        .await;
        let memory_keys = self.memory.delete_matching(|entry| regex.is_match(&entry.key));

        let outcome = RemovalOutcome {
            count: distinct(memory_keys, durable_keys),
            memory: TierOutcome::Applied,
            durable,
        };
        info!(pattern, count = outcome.count, "Cache entries deleted by pattern");
        Ok(outcome)
    }

    /// Removes every entry carrying one of `tags`, then each of `keys`.
    /// Counts add up per tag and per key, so overlaps are counted twice.
    pub async fn invalidate(&self, tags: &[String], keys: &[String]) -> CacheResult<RemovalOutcome> {
        let mut outcome = RemovalOutcome::empty();

        for tag in tags.iter().filter(|tag| !tag.is_empty()) {
            let (durable_keys, durable) = settle(
                "durable tag delete",
                self.timeout,
                self.durable.as_ref().map(|store| store.delete_by_tag(tag)),
            )
            .await;
            let memory_keys = self.memory.delete_matching(|entry| entry.has_tag(tag));

            let count = distinct(memory_keys, durable_keys);
            debug!(tag = %tag, count, "Tag invalidated");
            outcome = outcome.merge(RemovalOutcome {
                count,
                memory: TierOutcome::Applied,
                durable,
            });
        }

        for key in keys.iter().filter(|key| !key.trim().is_empty()) {
            outcome = outcome.merge(self.delete(key).await?);
        }

        info!(count = outcome.count, "Cache invalidated");
        Ok(outcome)
    }

    pub async fn clear(&self, scope: ClearScope) -> CacheResult<RemovalOutcome> {
        let (durable_count, durable) = match self.durable.as_ref() {
            Some(store) if scope.includes_durable() => {
                match bounded("durable clear", self.timeout, store.clear()).await {
                    Ok(count) => (count, TierOutcome::Applied),
                    Err(e) if scope == ClearScope::Durable => return Err(e),
                    Err(e) => {
                        warn!(error = %e, "Durable clear failed, memory tier cleared only");
                        (0, TierOutcome::Failed(e.to_string()))
                    }
                }
            }
            None if scope == ClearScope::Durable => {
                return Err(CacheError::tier_unavailable(
                    "durable",
                    "no durable tier configured",
                ))
            }
            _ => (0, TierOutcome::Skipped),
        };

        // Memory goes last so reads that overlapped the durable wipe cannot promote.
        let (memory_count, memory) = if scope.includes_memory() {
            (self.memory.clear() as u64, TierOutcome::Applied)
        } else {
            (0, TierOutcome::Skipped)
        };

        let outcome = RemovalOutcome {
            count: memory_count + durable_count,
            memory,
            durable,
        };
        info!(scope = scope.as_str(), count = outcome.count, "Cache cleared");
        Ok(outcome)
    }

    /// Pulls `keys` into memory through `get` and loads a page of active source
    /// records per namespace as memory-only entries keyed `namespace:id`.
    pub async fn warmup(&self, keys: &[String], namespaces: &[String]) -> CacheResult<usize> {
        let mut warmed = 0;

        for key in keys.iter().filter(|key| !key.trim().is_empty()) {
            match self.get(key, GetOptions::default()).await {
                Ok(Some(_)) => warmed += 1,
                Ok(None) => {}
                Err(e) => warn!(key = %key, error = %e, "Warmup read failed"),
            }
        }

        if namespaces.is_empty() {
            return Ok(warmed);
        }

        let defaults = self.configs.defaults();
        if !defaults.enable_memory_tier {
            warn!("Memory tier disabled, skipping namespace warmup");
            return Ok(warmed);
        }
        let Some(sources) = self.sources.as_ref() else {
            warn!("No source records configured, skipping namespace warmup");
            return Ok(warmed);
        };

        for namespace in namespaces {
            let records = match bounded(
                "load source records",
                self.timeout,
                sources.active_records(namespace, None, self.page_size),
            )
            .await
            {
                Ok(records) => records,
                Err(e) => {
                    warn!(namespace = %namespace, error = %e, "Skipping namespace warmup");
                    continue;
                }
            };

            for record in &records {
                let value = serde_json::to_vec(&record.value)?;
                let entry = CacheEntry::new(
                    format!("{}:{}", namespace, record.id),
                    value,
                    defaults.default_ttl,
                )
                .with_tags([namespace.as_str()]);
                self.memory.insert(entry);
            }
            debug!(namespace = %namespace, count = records.len(), "Namespace warmed");
            warmed += records.len();
        }

        info!(warmed, "Cache warmup finished");
        Ok(warmed)
    }

    /// Writes a page of the tenant's active records per namespace through both
    /// tiers, tagged with the namespace and the tenant.
    pub async fn preload(&self, tenant: &str, namespaces: &[String]) -> CacheResult<usize> {
        if tenant.trim().is_empty() {
            return Err(CacheError::missing("tenant"));
        }
        let sources = self
            .sources
            .as_ref()
            .ok_or_else(|| CacheError::config("no source records configured for preload"))?;

        let mut preloaded = 0;
        for namespace in namespaces {
            let records = match bounded(
                "load source records",
                self.timeout,
                sources.active_records(namespace, Some(tenant), self.page_size),
            )
            .await
            {
                Ok(records) => records,
                Err(e) => {
                    warn!(tenant, namespace = %namespace, error = %e, "Skipping namespace preload");
                    continue;
                }
            };

            for record in records {
                let key = format!("{}:{}", namespace, record.id);
                let options = SetOptions::default()
                    .tags([namespace.as_str(), tenant])
                    .tenant(tenant);
                self.set_json(&key, &record.value, options).await?;
                preloaded += 1;
            }
        }

        info!(tenant, preloaded, "Tenant cache preloaded");
        Ok(preloaded)
    }

    pub async fn get_stats(&self) -> StatsSnapshot {
        let memory = self.memory.stats();

        let counts = match self.durable.as_ref() {
            Some(store) => {
                match bounded("count durable entries", self.timeout, store.counts(Utc::now())).await {
                    Ok(counts) => Some(counts),
                    Err(e) => {
                        warn!(error = %e, "Durable tier unavailable for stats");
                        None
                    }
                }
            }
            None => None,
        };
        let StatsSummary {
            total_hits,
            total_misses,
            hit_rate,
        } = self.stats.summarize_today().await;

        let (total, expired) = counts
            .as_ref()
            .map(|c| (c.total, c.expired))
            .unwrap_or((0, 0));
        StatsSnapshot {
            memory: MemorySnapshot {
                size: memory.size,
                max_size: memory.max_size,
                usage_pct: memory.usage_pct,
                evictions: memory.evictions,
            },
            durable: DurableSnapshot {
                available: counts.is_some(),
                total,
                expired,
                active: total.saturating_sub(expired),
                hit_rate,
                hits: total_hits,
                misses: total_misses,
            },
            timestamp: Utc::now(),
        }
    }

    pub async fn get_cache_config(&self, tenant: Option<&str>) -> CacheConfig {
        self.configs.get(tenant).await
    }

    /// Persists a partial config update. The memory tier is shared by every
    /// tenant in the process, so a new `max_memory_entries` resizes it at once.
    pub async fn update_cache_config(
        &self,
        tenant: &str,
        patch: &CacheConfigPatch,
    ) -> CacheResult<CacheConfig> {
        if tenant.trim().is_empty() {
            return Err(CacheError::missing("tenant"));
        }
        let updated = self.configs.update(tenant, patch).await?;

        if patch.max_memory_entries.is_some() && updated.max_memory_entries != self.memory.capacity() {
            let evicted = self.memory.set_capacity(updated.max_memory_entries);
            info!(
                tenant,
                capacity = updated.max_memory_entries,
                evicted = evicted.len(),
                "Memory tier resized"
            );
        }

        Ok(updated)
    }

    /// Live keys held in memory.
    pub fn contains(&self, key: &str) -> bool {
        self.memory.contains(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.memory.keys()
    }

    /// A stopped janitor over this manager's tiers, ticking at the default cleanup interval.
    pub fn janitor(&self) -> Janitor {
        self.janitor_with_interval(self.configs.defaults().cleanup_interval)
    }

    pub fn janitor_with_interval(&self, interval: Duration) -> Janitor {
        Janitor::new(
            Arc::clone(&self.memory),
            self.durable.clone(),
            interval,
            self.timeout,
        )
    }

    /// Flushes pending stats; call before dropping the manager.
    pub async fn shutdown(&self) {
        self.stats.shutdown().await;
        debug!("Cache manager shut down");
    }
}

fn require_key(key: &str) -> CacheResult<&str> {
    if key.trim().is_empty() {
        Err(CacheError::missing("key"))
    } else {
        Ok(key)
    }
}

fn distinct(memory: Vec<String>, durable: Vec<String>) -> u64 {
    memory.into_iter().chain(durable).collect::<HashSet<_>>().len() as u64
}

/// Runs an optional durable removal, degrading to an empty result on failure.
async fn settle<F>(operation: &str, timeout: Duration, call: Option<F>) -> (Vec<String>, TierOutcome)
where
    F: Future<Output = CacheResult<Vec<String>>>,
{
    let Some(call) = call else {
        return (Vec::new(), TierOutcome::Skipped);
    };

    match bounded(operation, timeout, call).await {
        Ok(keys) => (keys, TierOutcome::Applied),
        Err(e) => {
            warn!(operation, error = %e, "Durable tier unavailable, removal applied to memory only");
            (Vec::new(), TierOutcome::Failed(e.to_string()))
        }
    }
}
