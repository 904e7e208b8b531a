pub mod memory;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

use std::sync::Arc;
use tracing::info;

use crate::cache::persistent::DurableStore;
use crate::infrastructure::config::{StorageBackend, StorageSection};
use crate::infrastructure::error::{CacheError, CacheResult};

pub use memory::InProcessStore;
#[cfg(feature = "storage-sqlite")]
pub use sqlite::SqliteStore;

/// 根据配置打开持久层
pub async fn open_store(config: &StorageSection) -> CacheResult<Arc<dyn DurableStore>> {
    match config.backend {
        StorageBackend::Memory => {
            info!("Using in-process durable tier");
            Ok(Arc::new(InProcessStore::new()))
        }
        #[cfg(feature = "storage-sqlite")]
        StorageBackend::Sqlite => {
            use crate::cache::persistent::PersistentTier;

            let url = config
                .database_url
                .as_deref()
                .ok_or_else(|| CacheError::config("sqlite backend requires storage.database_url"))?;
            info!(url, "Using SQLite durable tier");
            let store = SqliteStore::connect(url, config.max_connections).await?;
            if !store.health_check().await? {
                return Err(CacheError::tier_unavailable("sqlite", "health check failed"));
            }
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "storage-sqlite"))]
        StorageBackend::Sqlite => Err(CacheError::config(
            "sqlite backend requested but the `storage-sqlite` feature is disabled",
        )),
    }
}
