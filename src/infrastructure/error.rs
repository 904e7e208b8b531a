use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 缓存错误类型
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum CacheError {
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String, field: Option<String> },

    #[error("authentication failed: {message}")]
    Authentication { message: String },

    #[error("{tier} tier unavailable: {message}")]
    TierUnavailable { tier: String, message: String },

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("serialization error: {message}")]
    Serialization { message: String },

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl CacheError {
    /// 检查错误是否可重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CacheError::TierUnavailable { .. } | CacheError::Timeout { .. }
        )
    }

    /// 获取错误类别
    pub fn category(&self) -> ErrorCategory {
        match self {
            CacheError::InvalidArgument { .. } => ErrorCategory::Caller,
            CacheError::Authentication { .. } => ErrorCategory::Security,
            CacheError::TierUnavailable { .. } => ErrorCategory::Infrastructure,
            CacheError::Timeout { .. } => ErrorCategory::Infrastructure,
            CacheError::Serialization { .. } => ErrorCategory::Data,
            CacheError::Configuration { .. } => ErrorCategory::Configuration,
            CacheError::Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// 对外暴露的稳定错误码
    pub fn code(&self) -> &'static str {
        match self {
            CacheError::InvalidArgument { .. } => "INVALID_ARGUMENT",
            CacheError::Authentication { .. } => "UNAUTHENTICATED",
            CacheError::TierUnavailable { .. } => "TIER_UNAVAILABLE",
            CacheError::Timeout { .. } => "TIMEOUT",
            CacheError::Serialization { .. } => "SERIALIZATION",
            CacheError::Configuration { .. } => "CONFIGURATION",
            CacheError::Internal { .. } => "INTERNAL",
        }
    }

    /// 创建参数错误
    pub fn invalid_argument(message: impl Into<String>, field: Option<&str>) -> Self {
        CacheError::InvalidArgument {
            message: message.into(),
            field: field.map(str::to_string),
        }
    }

    /// 创建缺失参数错误
    pub fn missing(field: &str) -> Self {
        CacheError::InvalidArgument {
            message: format!("missing required parameter `{}`", field),
            field: Some(field.to_string()),
        }
    }

    /// 创建认证错误
    pub fn auth(message: impl Into<String>) -> Self {
        CacheError::Authentication {
            message: message.into(),
        }
    }

    /// 创建存储层不可用错误
    pub fn tier_unavailable(tier: impl Into<String>, message: impl Into<String>) -> Self {
        CacheError::TierUnavailable {
            tier: tier.into(),
            message: message.into(),
        }
    }

    /// 创建超时错误
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        CacheError::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// 创建配置错误
    pub fn config(message: impl Into<String>) -> Self {
        CacheError::Configuration {
            message: message.into(),
        }
    }

    /// 创建内部错误
    pub fn internal(message: impl Into<String>) -> Self {
        CacheError::Internal {
            message: message.into(),
        }
    }
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    Caller,
    Security,
    Infrastructure,
    Data,
    Configuration,
    Internal,
}

pub type CacheResult<T> = std::result::Result<T, CacheError>;

// 实现从常见错误类型的转换
impl From<std::io::Error> for CacheError {
    fn from(error: std::io::Error) -> Self {
        CacheError::Internal {
            message: error.to_string(),
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(error: serde_json::Error) -> Self {
        CacheError::Serialization {
            message: error.to_string(),
        }
    }
}

impl From<regex::Error> for CacheError {
    fn from(error: regex::Error) -> Self {
        CacheError::InvalidArgument {
            message: format!("invalid pattern: {}", error),
            field: Some("pattern".to_string()),
        }
    }
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::Error> for CacheError {
    fn from(error: sqlx::Error) -> Self {
        CacheError::TierUnavailable {
            tier: "durable".to_string(),
            message: error.to_string(),
        }
    }
}

impl From<anyhow::Error> for CacheError {
    fn from(error: anyhow::Error) -> Self {
        CacheError::Internal {
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_and_retryability() {
        let err = CacheError::missing("key");
        assert_eq!(err.code(), "INVALID_ARGUMENT");
        assert_eq!(err.category(), ErrorCategory::Caller);
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "invalid argument: missing required parameter `key`");

        let err = CacheError::timeout("durable get", 500);
        assert_eq!(err.code(), "TIMEOUT");
        assert!(err.is_retryable());

        let err = CacheError::tier_unavailable("durable", "connection refused");
        assert_eq!(err.to_string(), "durable tier unavailable: connection refused");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_regex_error_is_caller_error() {
        let err: CacheError = regex::Regex::new("(").unwrap_err().into();
        assert_eq!(err.code(), "INVALID_ARGUMENT");
    }
}
