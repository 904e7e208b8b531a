pub mod config_store;
pub mod entry;
pub mod janitor;
pub mod manager;
pub mod memory;
pub mod persistent;
pub mod sources;
pub mod stats;

pub use config_store::{CacheConfig, CacheConfigPatch, ConfigStore};
pub use entry::{CacheEntry, CacheSource, DEFAULT_NAMESPACE};
pub use janitor::{Janitor, JanitorState, SweepReport};
pub use manager::{
    CacheHit, CacheManager, ClearScope, DurableSnapshot, GetOptions, ManagerSettings,
    MemorySnapshot, RemovalOutcome, SetAck, SetOptions, StatsSnapshot, TierOutcome,
};
pub use memory::{MemoryTier, MemoryTierStats};
pub use persistent::{
    ConfigRepository, DurableCounts, DurableStore, PersistentTier, StatRecord, StatsStore,
};
pub use sources::{InProcessSources, SourceRecord, SourceRecords};
pub use stats::{StatKind, StatsRecorder, StatsSummary};
