use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::config_store::CacheConfig;
use crate::infrastructure::error::CacheError;
use crate::infrastructure::logging::{LogFormat, LogOutput};

/// 环境变量前缀
pub const ENV_PREFIX: &str = "WORKSHOP_CACHE_";

/// 应用程序配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 缓存默认值（租户未配置时使用）
    pub cache: CacheSection,

    /// 持久层配置
    pub storage: StorageSection,

    /// 命中统计配置
    pub stats: StatsSection,

    /// 预热配置
    pub warmup: WarmupSection,

    /// 鉴权配置
    pub auth: AuthSection,

    /// 日志配置
    pub logging: LoggingSection,
}

/// 缓存配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub default_ttl_ms: u64,
    pub max_memory_entries: usize,
    pub cleanup_interval_ms: u64,
    pub enable_memory_tier: bool,
    pub enable_durable_tier: bool,
    /// 单次持久层调用的超时时间
    pub durable_timeout_ms: u64,
}

impl CacheSection {
    /// 进程级默认的租户缓存配置
    pub fn tenant_defaults(&self) -> CacheConfig {
        CacheConfig {
            default_ttl: Duration::from_millis(self.default_ttl_ms),
            max_memory_entries: self.max_memory_entries,
            cleanup_interval: Duration::from_millis(self.cleanup_interval_ms),
            enable_memory_tier: self.enable_memory_tier,
            enable_durable_tier: self.enable_durable_tier,
        }
    }

    pub fn durable_timeout(&self) -> Duration {
        Duration::from_millis(self.durable_timeout_ms)
    }
}

impl Default for CacheSection {
    fn default() -> Self {
        let defaults = CacheConfig::default();
        Self {
            default_ttl_ms: defaults.default_ttl.as_millis() as u64,
            max_memory_entries: defaults.max_memory_entries,
            cleanup_interval_ms: defaults.cleanup_interval.as_millis() as u64,
            enable_memory_tier: defaults.enable_memory_tier,
            enable_durable_tier: defaults.enable_durable_tier,
            durable_timeout_ms: 3_000,
        }
    }
}

/// 持久层后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// 进程内存储，仅用于开发和测试
    Memory,
    Sqlite,
}

impl std::str::FromStr for StorageBackend {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "sqlite" => Ok(StorageBackend::Sqlite),
            other => Err(CacheError::config(format!("unknown storage backend '{}'", other))),
        }
    }
}

/// 存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub backend: StorageBackend,
    pub database_url: Option<String>,
    pub max_connections: u32,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            database_url: None,
            max_connections: 5,
        }
    }
}

/// 统计配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsSection {
    /// 统计事件队列容量，溢出时丢弃最旧的事件
    pub channel_capacity: usize,
}

impl Default for StatsSection {
    fn default() -> Self {
        Self { channel_capacity: 1024 }
    }
}

/// 预热配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WarmupSection {
    pub page_size: usize,
    pub preload_collections: Vec<String>,
}

impl Default for WarmupSection {
    fn default() -> Self {
        Self {
            page_size: 100,
            preload_collections: vec![
                "factories".to_string(),
                "products".to_string(),
                "send_orders".to_string(),
                "receive_orders".to_string(),
            ],
        }
    }
}

/// 鉴权配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    pub secret: Option<String>,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    pub format: String,
    pub output: String,
    pub file_path: Option<PathBuf>,
    pub include_file_location: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
            output: "stderr".to_string(),
            file_path: None,
            include_file_location: false,
        }
    }
}

impl LoggingSection {
    /// 转换为日志系统配置
    pub fn to_logging_config(&self) -> Result<crate::infrastructure::logging::LoggingConfig, CacheError> {
        let level = self
            .level
            .parse::<tracing::Level>()
            .map_err(|_| CacheError::config(format!("invalid log level '{}'", self.level)))?;

        let format = match self.format.as_str() {
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            "json" => LogFormat::Json,
            other => return Err(CacheError::config(format!("invalid log format '{}'", other))),
        };

        let output = match self.output.as_str() {
            "stdout" => LogOutput::Stdout,
            "stderr" => LogOutput::Stderr,
            "file" => {
                let path = self
                    .file_path
                    .clone()
                    .ok_or_else(|| CacheError::config("log output 'file' requires file_path"))?;
                LogOutput::File(path)
            }
            other => return Err(CacheError::config(format!("invalid log output '{}'", other))),
        };

        Ok(crate::infrastructure::logging::LoggingConfig {
            level,
            format,
            output,
            include_file_location: self.include_file_location,
            ..Default::default()
        })
    }
}

/// 配置源
#[derive(Debug, Clone)]
pub enum ConfigSource {
    File(PathBuf),
    Environment,
    CommandLine(HashMap<String, String>),
    Default,
}

/// 配置管理器
pub struct ConfigManager {
    config: AppConfig,
    config_sources: Vec<ConfigSource>,
}

impl ConfigManager {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
            config_sources: vec![ConfigSource::Default],
        }
    }

    /// 添加配置源
    pub fn add_source(mut self, source: ConfigSource) -> Self {
        self.config_sources.push(source);
        self
    }

    /// 加载配置
    pub fn load(&mut self) -> Result<&AppConfig, CacheError> {
        let mut config = AppConfig::default();

        // 按优先级顺序加载配置源
        for source in &self.config_sources {
            match source {
                ConfigSource::File(path) => {
                    if let Some(file_config) = load_from_file(path)? {
                        config = file_config;
                    }
                }
                ConfigSource::Environment => {
                    load_from_environment(&mut config)?;
                }
                ConfigSource::CommandLine(args) => {
                    load_from_command_line(&mut config, args)?;
                }
                ConfigSource::Default => {}
            }
        }

        validate_config(&config)?;

        self.config = config;
        Ok(&self.config)
    }

    /// 获取配置
    pub fn get_config(&self) -> &AppConfig {
        &self.config
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

/// 从文件加载配置，文件不存在时返回 None
fn load_from_file(path: &Path) -> Result<Option<AppConfig>, CacheError> {
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(path).map_err(|e| {
        CacheError::config(format!("cannot read config file {}: {}", path.display(), e))
    })?;

    let config = match path.extension().and_then(|s| s.to_str()) {
        Some("toml") => toml::from_str(&content)
            .map_err(|e| CacheError::config(format!("TOML parse error: {}", e)))?,
        Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
            .map_err(|e| CacheError::config(format!("YAML parse error: {}", e)))?,
        Some("json") => serde_json::from_str(&content)
            .map_err(|e| CacheError::config(format!("JSON parse error: {}", e)))?,
        _ => return Err(CacheError::config("unsupported config file format")),
    };

    Ok(Some(config))
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, CacheError> {
    value
        .parse()
        .map_err(|_| CacheError::config(format!("invalid value '{}' for {}", value, name)))
}

/// 从环境变量加载配置
fn load_from_environment(config: &mut AppConfig) -> Result<(), CacheError> {
    let var = |suffix: &str| std::env::var(format!("{}{}", ENV_PREFIX, suffix)).ok();

    if let Some(backend) = var("STORAGE_BACKEND") {
        config.storage.backend = backend.parse()?;
    }

    if let Some(url) = var("DATABASE_URL") {
        config.storage.database_url = Some(url);
    }

    if let Some(ttl) = var("DEFAULT_TTL_MS") {
        config.cache.default_ttl_ms = parse_env("DEFAULT_TTL_MS", &ttl)?;
    }

    if let Some(max) = var("MAX_MEMORY_ENTRIES") {
        config.cache.max_memory_entries = parse_env("MAX_MEMORY_ENTRIES", &max)?;
    }

    if let Some(interval) = var("CLEANUP_INTERVAL_MS") {
        config.cache.cleanup_interval_ms = parse_env("CLEANUP_INTERVAL_MS", &interval)?;
    }

    if let Some(secret) = var("AUTH_SECRET") {
        config.auth.secret = Some(secret);
    }

    if let Some(level) = var("LOG_LEVEL") {
        config.logging.level = level;
    }

    Ok(())
}

/// 从命令行参数加载配置
fn load_from_command_line(
    config: &mut AppConfig,
    args: &HashMap<String, String>,
) -> Result<(), CacheError> {
    for (key, value) in args {
        match key.as_str() {
            "storage-backend" => config.storage.backend = value.parse()?,
            "database-url" => config.storage.database_url = Some(value.clone()),
            "max-memory-entries" => {
                config.cache.max_memory_entries = parse_env(key, value)?;
            }
            "cleanup-interval-ms" => {
                config.cache.cleanup_interval_ms = parse_env(key, value)?;
            }
            "log-level" => config.logging.level = value.clone(),
            "log-format" => config.logging.format = value.clone(),
            _ => {
                // 忽略未知参数
            }
        }
    }

    Ok(())
}

/// 验证配置
fn validate_config(config: &AppConfig) -> Result<(), CacheError> {
    config.cache.tenant_defaults().validate()?;

    if config.cache.durable_timeout_ms == 0 {
        return Err(CacheError::config("durable_timeout_ms must be greater than 0"));
    }

    if config.stats.channel_capacity == 0 {
        return Err(CacheError::config("stats.channel_capacity must be greater than 0"));
    }

    if config.warmup.page_size == 0 {
        return Err(CacheError::config("warmup.page_size must be greater than 0"));
    }

    if config.storage.backend == StorageBackend::Sqlite && config.storage.database_url.is_none() {
        return Err(CacheError::config("sqlite backend requires storage.database_url"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.warmup.page_size, 100);
        assert!(config.cache.enable_memory_tier);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_config_manager_creation() {
        let manager = ConfigManager::new();
        assert_eq!(manager.config_sources.len(), 1);
        assert!(matches!(manager.config_sources[0], ConfigSource::Default));
    }

    #[test]
    fn test_load_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[cache]
max_memory_entries = 42
default_ttl_ms = 1500

[storage]
backend = "sqlite"
database_url = "sqlite::memory:"
"#
        )
        .unwrap();

        let mut manager = ConfigManager::new().add_source(ConfigSource::File(file.path().to_path_buf()));
        let config = manager.load().unwrap();
        assert_eq!(config.cache.max_memory_entries, 42);
        assert_eq!(config.cache.tenant_defaults().default_ttl, Duration::from_millis(1500));
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        // 未出现的字段保持默认值
        assert_eq!(config.warmup.page_size, 100);
    }

    #[test]
    fn test_command_line_overrides_and_validation() {
        let mut args = HashMap::new();
        args.insert("max-memory-entries".to_string(), "0".to_string());

        let mut manager = ConfigManager::new().add_source(ConfigSource::CommandLine(args));
        assert!(manager.load().is_err());

        let mut args = HashMap::new();
        args.insert("storage-backend".to_string(), "sqlite".to_string());
        let mut manager = ConfigManager::new().add_source(ConfigSource::CommandLine(args));
        let err = manager.load().unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION");
    }

    #[test]
    fn test_logging_section_conversion() {
        let section = LoggingSection {
            level: "debug".to_string(),
            format: "json".to_string(),
            ..Default::default()
        };
        let logging = section.to_logging_config().unwrap();
        assert_eq!(logging.level, tracing::Level::DEBUG);
        assert!(matches!(logging.format, LogFormat::Json));

        let section = LoggingSection {
            output: "file".to_string(),
            ..Default::default()
        };
        assert!(section.to_logging_config().is_err());
    }
}
