use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

use crate::cache::manager::{CacheManager, GetOptions, SetOptions};
use crate::infrastructure::error::{CacheError, CacheResult};
use crate::service::actions::*;
use crate::service::auth::{AuthContext, Authenticator};

/// 动作分发入口
///
/// 所有错误在此转换为 `{success:false, error, code}`，不会向外抛出。
pub struct CacheService {
    manager: Arc<CacheManager>,
    authenticator: Option<Arc<dyn Authenticator>>,
    preload_collections: Vec<String>,
}

impl CacheService {
    /// 未配置认证器时，所有需要令牌的动作都会被拒绝
    pub fn new(manager: Arc<CacheManager>, authenticator: Option<Arc<dyn Authenticator>>) -> Self {
        Self {
            manager,
            authenticator,
            preload_collections: Vec::new(),
        }
    }

    pub fn with_preload_collections(mut self, collections: Vec<String>) -> Self {
        self.preload_collections = collections;
        self
    }

    pub fn manager(&self) -> &Arc<CacheManager> {
        &self.manager
    }

    /// 处理一行 JSON 请求
    pub async fn handle_line(&self, line: &str) -> ActionResponse {
        match serde_json::from_str::<Value>(line) {
            Ok(request) => self.handle(request).await,
            Err(e) => ActionResponse::failure(&CacheError::invalid_argument(
                format!("malformed request: {}", e),
                None,
            )),
        }
    }

    pub async fn handle(&self, request: Value) -> ActionResponse {
        let request: ActionRequest = match serde_json::from_value(request) {
            Ok(request) => request,
            Err(e) => {
                return ActionResponse::failure(&CacheError::invalid_argument(
                    format!("invalid request: {}", e),
                    None,
                ))
            }
        };

        let action = request.action.name();
        let span = info_span!("action", action, request_id = %Uuid::new_v4());
        match self.dispatch(request).instrument(span).await {
            Ok(Some(data)) => {
                debug!(action, "Action handled");
                ActionResponse::ok(data)
            }
            Ok(None) => ActionResponse::not_found(),
            Err(e) => {
                warn!(action, code = e.code(), error = %e, "Action failed");
                ActionResponse::failure(&e)
            }
        }
    }

    async fn authenticate(&self, token: Option<&str>) -> CacheResult<AuthContext> {
        let token = token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| CacheError::auth("missing token"))?;
        let authenticator = self
            .authenticator
            .as_ref()
            .ok_or_else(|| CacheError::auth("authentication is not configured"))?;
        authenticator.authenticate(token).await
    }

    async fn dispatch(&self, request: ActionRequest) -> CacheResult<Option<Value>> {
        let context = if request.action.requires_auth() {
            Some(self.authenticate(request.token.as_deref()).await?)
        } else {
            None
        };

        match (request.action, context) {
            (Action::Get(params), _) => self.get(params).await,
            (Action::Warmup(params), _) => {
                let warmed = self
                    .manager
                    .warmup(&params.keys, &params.collections)
                    .await?;
                to_data(WarmupResult {
                    warmed_count: warmed,
                    timestamp: Utc::now(),
                })
            }
            (action, Some(context)) => self.protected(action, context).await,
            (action, None) => Err(CacheError::internal(format!(
                "action `{}` reached dispatch without authentication",
                action.name()
            ))),
        }
    }

    async fn protected(&self, action: Action, context: AuthContext) -> CacheResult<Option<Value>> {
        match action {
            Action::Set(params) => self.set(params, &context).await,
            Action::Delete(params) => {
                let outcome = match (params.key, params.pattern) {
                    (_, Some(pattern)) => self.manager.delete_by_pattern(&pattern).await?,
                    (Some(key), None) => self.manager.delete(&key).await?,
                    (None, None) => return Err(CacheError::missing("key")),
                };
                to_data(DeleteResult {
                    deleted_count: outcome.count,
                    memory: outcome.memory,
                    durable: outcome.durable,
                })
            }
            Action::Clear(params) => {
                let outcome = self.manager.clear(params.scope).await?;
                to_data(ClearResult {
                    cleared_count: outcome.count,
                    scope: params.scope,
                })
            }
            Action::GetStats => {
                let snapshot = self.manager.get_stats().await;
                let memory = MemoryStatsResult {
                    size: snapshot.memory.size,
                    max_size: snapshot.memory.max_size,
                    usage_pct: snapshot.memory.usage_pct,
                };
                Ok(Some(json!({
                    "memory": memory,
                    "database": snapshot.durable,
                    "timestamp": snapshot.timestamp,
                })))
            }
            Action::Preload(params) => {
                let tenant = params.org_id.unwrap_or_else(|| context.tenant_id.clone());
                let collections = params
                    .collections
                    .unwrap_or_else(|| self.preload_collections.clone());
                let preloaded = self.manager.preload(&tenant, &collections).await?;
                to_data(PreloadResult {
                    preloaded_count: preloaded,
                    timestamp: Utc::now(),
                })
            }
            Action::Invalidate(params) => {
                let outcome = self.manager.invalidate(&params.tags, &params.keys).await?;
                to_data(InvalidateResult {
                    invalidated_count: outcome.count,
                    timestamp: Utc::now(),
                })
            }
            Action::GetCacheConfig => {
                let config = self
                    .manager
                    .get_cache_config(Some(&context.tenant_id))
                    .await;
                to_data(config)
            }
            Action::UpdateCacheConfig(params) => {
                let patch = params.config.ok_or_else(|| CacheError::missing("config"))?;
                let config = self
                    .manager
                    .update_cache_config(&context.tenant_id, &patch)
                    .await?;
                to_data(config)
            }
            Action::Get(_) | Action::Warmup(_) => Err(CacheError::internal(
                "public action routed as protected",
            )),
        }
    }

    async fn get(&self, params: GetParams) -> CacheResult<Option<Value>> {
        let key = params.key.ok_or_else(|| CacheError::missing("key"))?;
        let options = GetOptions {
            use_memory: params.use_memory_cache.unwrap_or(true),
            use_durable: params.use_db_cache.unwrap_or(true),
        };

        let Some(hit) = self.manager.get(&key, options).await? else {
            return Ok(None);
        };

        let value = serde_json::from_slice(&hit.value)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&hit.value).into_owned()));
        to_data(GetResult {
            value,
            source: hit.source.as_str(),
            timestamp: hit.created_at,
            expire_time: hit.expires_at,
        })
    }

    async fn set(&self, params: SetParams, context: &AuthContext) -> CacheResult<Option<Value>> {
        let key = params.key.ok_or_else(|| CacheError::missing("key"))?;
        let value = params.value.ok_or_else(|| CacheError::missing("value"))?;

        let mut options = SetOptions::default()
            .tags(params.tags)
            .tenant(context.tenant_id.as_str());
        options.ttl = params.ttl.map(Duration::from_millis);
        options.use_memory = params.use_memory_cache.unwrap_or(true);
        options.use_durable = params.use_db_cache.unwrap_or(true);

        let ack = self.manager.set_json(&key, &value, options).await?;
        to_data(SetResult {
            key: ack.key,
            timestamp: ack.timestamp,
            expire_time: ack.expires_at,
            ttl: ack.ttl.as_millis() as u64,
            memory: ack.memory,
            durable: ack.durable,
        })
    }
}

fn to_data<T: Serialize>(result: T) -> CacheResult<Option<Value>> {
    Ok(Some(serde_json::to_value(result)?))
}
