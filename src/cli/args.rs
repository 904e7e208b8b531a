use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Parser, Debug, Default)]
#[command(
    name = "workshop-cache",
    version,
    about = "两级缓存服务 - 通过标准输入输出处理 JSON 动作请求",
    long_about = "workshop-cache 在进程内存层与持久层之前提供统一的缓存入口。每行读取一个 JSON 动作请求（get、set、delete、invalidate、warmup 等），并向标准输出写出一行 JSON 响应。"
)]
pub struct Args {
    /// 配置文件路径（.toml、.yaml/.yml 或 .json）
    #[arg(short = 'c', long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// 持久层后端（memory 或 sqlite）
    #[arg(long = "storage-backend", value_name = "BACKEND")]
    pub storage_backend: Option<String>,

    /// 数据库连接串，如 sqlite://cache.db
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// 内存层最大条目数
    #[arg(long = "max-memory-entries", value_name = "N")]
    pub max_memory_entries: Option<usize>,

    /// 过期清理间隔（毫秒）
    #[arg(long = "cleanup-interval-ms", value_name = "MS")]
    pub cleanup_interval_ms: Option<u64>,

    /// 日志级别（trace、debug、info、warn、error）
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// 日志格式（pretty、compact、json）
    #[arg(long = "log-format", value_name = "FORMAT")]
    pub log_format: Option<String>,

    /// 预热/预加载使用的业务数据文件（JSON）
    #[arg(long, value_name = "FILE")]
    pub seed: Option<PathBuf>,

    /// 使用 auth.secret 签发令牌后退出
    #[arg(long = "issue-token", num_args = 2, value_names = ["TENANT", "USER"])]
    pub issue_token: Option<Vec<String>>,
}

impl Args {
    /// 转换为 `ConfigSource::CommandLine` 使用的覆盖项
    pub fn overrides(&self) -> HashMap<String, String> {
        let mut overrides = HashMap::new();
        let mut put = |key: &str, value: Option<String>| {
            if let Some(value) = value {
                overrides.insert(key.to_string(), value);
            }
        };

        put("storage-backend", self.storage_backend.clone());
        put("database-url", self.database_url.clone());
        put("max-memory-entries", self.max_memory_entries.map(|n| n.to_string()));
        put("cleanup-interval-ms", self.cleanup_interval_ms.map(|n| n.to_string()));
        put("log-level", self.log_level.clone());
        put("log-format", self.log_format.clone());

        overrides
    }
}
