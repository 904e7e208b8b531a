use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::config_store::CacheConfigPatch;
use crate::cache::manager::{ClearScope, TierOutcome};
use crate::infrastructure::error::CacheError;

/// 动作请求信封：`{action, token?, ...params}`
#[derive(Debug, Clone, Deserialize)]
pub struct ActionRequest {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(flatten)]
    pub action: Action,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Action {
    Get(GetParams),
    Set(SetParams),
    Delete(DeleteParams),
    Clear(ClearParams),
    GetStats,
    Warmup(WarmupParams),
    Preload(PreloadParams),
    Invalidate(InvalidateParams),
    GetCacheConfig,
    UpdateCacheConfig(UpdateConfigParams),
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Get(_) => "get",
            Action::Set(_) => "set",
            Action::Delete(_) => "delete",
            Action::Clear(_) => "clear",
            Action::GetStats => "getStats",
            Action::Warmup(_) => "warmup",
            Action::Preload(_) => "preload",
            Action::Invalidate(_) => "invalidate",
            Action::GetCacheConfig => "getCacheConfig",
            Action::UpdateCacheConfig(_) => "updateCacheConfig",
        }
    }

    /// `get` 与 `warmup` 为公开动作，其余动作需要令牌
    pub fn requires_auth(&self) -> bool {
        !matches!(self, Action::Get(_) | Action::Warmup(_))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetParams {
    pub key: Option<String>,
    pub use_memory_cache: Option<bool>,
    pub use_db_cache: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetParams {
    pub key: Option<String>,
    pub value: Option<Value>,
    /// 毫秒
    pub ttl: Option<u64>,
    pub use_memory_cache: Option<bool>,
    pub use_db_cache: Option<bool>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeleteParams {
    pub key: Option<String>,
    pub pattern: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClearParams {
    #[serde(default)]
    pub scope: ClearScope,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WarmupParams {
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub collections: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreloadParams {
    pub org_id: Option<String>,
    /// 缺省时使用配置中的 `warmup.preload_collections`
    pub collections: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvalidateParams {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateConfigParams {
    pub config: Option<CacheConfigPatch>,
}

/// 动作响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ActionResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            code: None,
        }
    }

    pub fn failure(error: &CacheError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
            code: Some(error.code().to_string()),
        }
    }

    pub fn not_found() -> Self {
        Self {
            success: false,
            data: None,
            error: Some("not found".to_string()),
            code: Some("NOT_FOUND".to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetResult {
    pub value: Value,
    pub source: &'static str,
    pub timestamp: DateTime<Utc>,
    pub expire_time: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetResult {
    pub key: String,
    pub timestamp: DateTime<Utc>,
    pub expire_time: DateTime<Utc>,
    /// 毫秒
    pub ttl: u64,
    pub memory: TierOutcome,
    pub durable: TierOutcome,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResult {
    pub deleted_count: u64,
    pub memory: TierOutcome,
    pub durable: TierOutcome,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearResult {
    pub cleared_count: u64,
    pub scope: ClearScope,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WarmupResult {
    pub warmed_count: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreloadResult {
    pub preloaded_count: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidateResult {
    pub invalidated_count: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStatsResult {
    pub size: usize,
    pub max_size: usize,
    pub usage_pct: f64,
}
