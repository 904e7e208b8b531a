pub mod config;
pub mod error;
pub mod logging;

pub use config::{AppConfig, ConfigManager, ConfigSource, StorageBackend};
pub use error::{CacheError, CacheResult, ErrorCategory};
pub use logging::{setup_logging, LoggingConfig};
