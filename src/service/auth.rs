use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::infrastructure::error::{CacheError, CacheResult};

type HmacSha256 = Hmac<Sha256>;

/// 已认证的调用方
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthContext {
    pub tenant_id: String,
    pub user_id: String,
}

/// 令牌校验
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, token: &str) -> CacheResult<AuthContext>;
}

/// HMAC-SHA256 签名令牌
///
/// 令牌格式为 `<tenant>.<user>.<signature>`，其中签名是对 `<tenant>.<user>`
/// 计算的 HMAC-SHA256，使用 URL 安全的无填充 base64 编码。
pub struct HmacTokenAuthenticator {
    secret: Vec<u8>,
}

impl HmacTokenAuthenticator {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    /// 签发令牌
    pub fn issue(&self, tenant_id: &str, user_id: &str) -> CacheResult<String> {
        for (field, value) in [("tenantId", tenant_id), ("userId", user_id)] {
            if value.is_empty() || value.contains('.') {
                return Err(CacheError::invalid_argument(
                    format!("{} must be non-empty and must not contain '.'", field),
                    Some(field),
                ));
            }
        }

        let payload = format!("{}.{}", tenant_id, user_id);
        let signature = self.mac(&payload)?.finalize().into_bytes();
        let encoded = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(signature);
        Ok(format!("{}.{}", payload, encoded))
    }

    fn mac(&self, payload: &str) -> CacheResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| CacheError::internal(format!("invalid HMAC key: {}", e)))?;
        mac.update(payload.as_bytes());
        Ok(mac)
    }
}

#[async_trait]
impl Authenticator for HmacTokenAuthenticator {
    async fn authenticate(&self, token: &str) -> CacheResult<AuthContext> {
        let mut parts = token.splitn(3, '.');
        let (Some(tenant_id), Some(user_id), Some(signature)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(CacheError::auth("malformed token"));
        };
        if tenant_id.is_empty() || user_id.is_empty() {
            return Err(CacheError::auth("malformed token"));
        }

        let signature = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| CacheError::auth("malformed token signature"))?;

        self.mac(&format!("{}.{}", tenant_id, user_id))?
            .verify_slice(&signature)
            .map_err(|_| CacheError::auth("invalid token signature"))?;

        Ok(AuthContext {
            tenant_id: tenant_id.to_string(),
            user_id: user_id.to_string(),
        })
    }
}
