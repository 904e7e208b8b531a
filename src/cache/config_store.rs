use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::cache::persistent::{bounded, DurableStore};
use crate::infrastructure::error::{CacheError, CacheResult};

/// Serialises a `Duration` as integer milliseconds.
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Per-tenant cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    #[serde(with = "duration_ms")]
    pub default_ttl: Duration,
    pub max_memory_entries: usize,
    #[serde(with = "duration_ms")]
    pub cleanup_interval: Duration,
    pub enable_memory_tier: bool,
    pub enable_durable_tier: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
            max_memory_entries: 1000,
            cleanup_interval: Duration::from_secs(60),
            enable_memory_tier: true,
            enable_durable_tier: true,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> CacheResult<()> {
        if self.max_memory_entries == 0 {
            return Err(CacheError::invalid_argument(
                "maxMemoryEntries must be greater than 0",
                Some("maxMemoryEntries"),
            ));
        }
        if self.default_ttl.is_zero() {
            return Err(CacheError::invalid_argument(
                "defaultTtl must be greater than 0",
                Some("defaultTtl"),
            ));
        }
        if self.cleanup_interval.is_zero() {
            return Err(CacheError::invalid_argument(
                "cleanupInterval must be greater than 0",
                Some("cleanupInterval"),
            ));
        }
        Ok(())
    }

    pub fn apply(&self, patch: &CacheConfigPatch) -> CacheConfig {
        CacheConfig {
            default_ttl: patch
                .default_ttl
                .map(Duration::from_millis)
                .unwrap_or(self.default_ttl),
            max_memory_entries: patch.max_memory_entries.unwrap_or(self.max_memory_entries),
            cleanup_interval: patch
                .cleanup_interval
                .map(Duration::from_millis)
                .unwrap_or(self.cleanup_interval),
            enable_memory_tier: patch.enable_memory_tier.unwrap_or(self.enable_memory_tier),
            enable_durable_tier: patch.enable_durable_tier.unwrap_or(self.enable_durable_tier),
        }
    }
}

/// Partial update accepted by `updateCacheConfig`; durations in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfigPatch {
    pub default_ttl: Option<u64>,
    pub max_memory_entries: Option<usize>,
    pub cleanup_interval: Option<u64>,
    pub enable_memory_tier: Option<bool>,
    pub enable_durable_tier: Option<bool>,
}

/// How long a memoised tenant config is trusted before re-reading the durable tier.
const MEMO_TTL: Duration = Duration::from_secs(30);

/// How long the defaults stand in for a tenant whose config could not be read.
const FAILED_LOAD_TTL: Duration = Duration::from_secs(5);

/// Tenant configuration read and written through the durable tier.
pub struct ConfigStore {
    repository: Arc<dyn DurableStore>,
    defaults: CacheConfig,
    timeout: Duration,
    // Tenant -> (config, trusted until).
    memo: RwLock<HashMap<String, (CacheConfig, Instant)>>,
}

impl ConfigStore {
    pub fn new(repository: Arc<dyn DurableStore>, defaults: CacheConfig, timeout: Duration) -> Self {
        Self {
            repository,
            defaults,
            timeout,
            memo: RwLock::new(HashMap::new()),
        }
    }

    pub fn defaults(&self) -> &CacheConfig {
        &self.defaults
    }

    /// Effective config for `tenant`; `None` or an unreadable record yields the defaults.
    pub async fn get(&self, tenant: Option<&str>) -> CacheConfig {
        let Some(tenant) = tenant else {
            return self.defaults.clone();
        };

        if let Some((config, valid_until)) = self.memo.read().get(tenant) {
            if Instant::now() < *valid_until {
                return config.clone();
            }
        }

        match bounded("load cache config", self.timeout, self.repository.load_config(tenant)).await {
            Ok(stored) => {
                let config = stored.unwrap_or_else(|| self.defaults.clone());
                self.remember(tenant, config.clone(), MEMO_TTL);
                config
            }
            Err(e) => {
                warn!(tenant, error = %e, "Falling back to default cache config");
                self.remember(tenant, self.defaults.clone(), FAILED_LOAD_TTL);
                self.defaults.clone()
            }
        }
    }

    fn remember(&self, tenant: &str, config: CacheConfig, ttl: Duration) {
        self.memo
            .write()
            .insert(tenant.to_string(), (config, Instant::now() + ttl));
    }

    /// Merges `patch` into the tenant's effective config and persists the result.
    pub async fn update(&self, tenant: &str, patch: &CacheConfigPatch) -> CacheResult<CacheConfig> {
        let current = self.get(Some(tenant)).await;
        let updated = current.apply(patch);
        updated.validate()?;

        bounded(
            "save cache config",
            self.timeout,
            self.repository.save_config(tenant, &updated),
        )
        .await?;

        debug!(tenant, "Cache config updated");
        self.remember(tenant, updated.clone(), MEMO_TTL);

        Ok(updated)
    }

    pub fn forget(&self, tenant: &str) {
        self.memo.write().remove(tenant);
    }
}
