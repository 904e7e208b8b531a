use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::infrastructure::error::{CacheError, CacheResult};

fn default_active() -> bool {
    true
}

/// A business record that warmup and preload copy into the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub id: String,
    #[serde(default)]
    pub tenant: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    pub value: serde_json::Value,
}

/// Read access to the collections the cache fronts (factories, products, orders).
#[async_trait]
pub trait SourceRecords: Send + Sync {
    /// Up to `limit` active records of `namespace`, restricted to `tenant` when given.
    async fn active_records(
        &self,
        namespace: &str,
        tenant: Option<&str>,
        limit: usize,
    ) -> CacheResult<Vec<SourceRecord>>;
}

/// Source records held in memory, optionally seeded from a JSON file shaped as
/// `{"<namespace>": [{"id": "...", "tenant": "...", "active": true, "value": {...}}]}`.
#[derive(Debug, Default)]
pub struct InProcessSources {
    collections: RwLock<HashMap<String, Vec<SourceRecord>>>,
}

impl InProcessSources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_file(path: &Path) -> CacheResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CacheError::config(format!("cannot read seed file {}: {}", path.display(), e))
        })?;
        let collections: HashMap<String, Vec<SourceRecord>> = serde_json::from_str(&content)?;
        Ok(Self {
            collections: RwLock::new(collections),
        })
    }

    pub fn insert(&self, namespace: &str, record: SourceRecord) {
        self.collections
            .write()
            .entry(namespace.to_string())
            .or_default()
            .push(record);
    }
}

#[async_trait]
impl SourceRecords for InProcessSources {
    async fn active_records(
        &self,
        namespace: &str,
        tenant: Option<&str>,
        limit: usize,
    ) -> CacheResult<Vec<SourceRecord>> {
        let collections = self.collections.read();
        let Some(records) = collections.get(namespace) else {
            return Ok(Vec::new());
        };

        Ok(records
            .iter()
            .filter(|record| record.active)
            .filter(|record| tenant.is_none() || record.tenant.as_deref() == tenant)
            .take(limit)
            .cloned()
            .collect())
    }
}
