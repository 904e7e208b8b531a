use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Namespace used when a key carries no `namespace:` prefix.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Cache entry with metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: Bytes,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub tags: BTreeSet<String>,
    pub owner: Option<String>,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, value: impl Into<Bytes>, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            value: value.into(),
            created_at: now,
            expires_at: expiry_from(now, ttl),
            tags: BTreeSet::new(),
            owner: None,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_owner(mut self, owner: Option<String>) -> Self {
        self.owner = owner;
        self
    }

    /// An entry is live while `now <= expires_at`.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        now <= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        !self.is_live_at(Utc::now())
    }

    pub fn ttl(&self) -> Duration {
        (self.expires_at - self.created_at)
            .to_std()
            .unwrap_or_default()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn namespace(&self) -> &str {
        namespace_of(&self.key)
    }
}

/// Saturating `now + ttl`; absurd TTLs clamp to the far future instead of panicking.
pub fn expiry_from(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `"products:42"` -> `"products"`.
pub fn namespace_of(key: &str) -> &str {
    match key.split_once(':') {
        Some((namespace, _)) if !namespace.is_empty() => namespace,
        _ => DEFAULT_NAMESPACE,
    }
}

/// Which tier served a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheSource {
    Memory,
    Durable,
}

impl CacheSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheSource::Memory => "memory",
            CacheSource::Durable => "durable",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_of() {
        assert_eq!(namespace_of("products:42"), "products");
        assert_eq!(namespace_of("send_orders:2024:7"), "send_orders");
        assert_eq!(namespace_of("plain"), DEFAULT_NAMESPACE);
        assert_eq!(namespace_of(":orphan"), DEFAULT_NAMESPACE);
    }

    #[test]
    fn test_liveness_boundary() {
        let entry = CacheEntry::new("k", "v", Duration::from_millis(100));
        assert!(entry.is_live_at(entry.expires_at));
        assert!(!entry.is_live_at(entry.expires_at + chrono::Duration::milliseconds(1)));
        assert_eq!(entry.ttl(), Duration::from_millis(100));
    }

    #[test]
    fn test_huge_ttl_does_not_overflow() {
        let entry = CacheEntry::new("k", "v", Duration::from_secs(u64::MAX));
        assert!(!entry.is_expired());
    }

    #[test]
    fn test_tags() {
        let entry = CacheEntry::new("f:1", "v", Duration::from_secs(1))
            .with_tags(["factories", "org-1"]);
        assert!(entry.has_tag("factories"));
        assert!(!entry.has_tag("products"));
        assert_eq!(entry.namespace(), "f");
    }
}
