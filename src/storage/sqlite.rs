use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use regex::Regex;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeSet;
use std::str::FromStr;
use tracing::info;

use crate::cache::config_store::CacheConfig;
use crate::cache::entry::CacheEntry;
use crate::cache::persistent::{
    stat_key, ConfigRepository, DurableCounts, PersistentTier, StatRecord, StatsStore,
};
use crate::infrastructure::error::{CacheError, CacheResult};

const ENTRIES_TABLE: &str = "cache_entries";
const STATS_TABLE: &str = "cache_stats";
const CONFIG_TABLE: &str = "cache_config";

/// SQLite 持久层
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// 连接数据库并创建表结构
    pub async fn connect(database_url: &str, max_connections: u32) -> CacheResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.create_tables().await?;
        Ok(store)
    }

    /// 创建数据库表
    async fn create_tables(&self) -> CacheResult<()> {
        let statements = [
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    key TEXT PRIMARY KEY,
                    value BLOB NOT NULL,
                    ttl INTEGER NOT NULL,
                    expire_time INTEGER NOT NULL,
                    tags TEXT NOT NULL,
                    tenant TEXT,
                    created_at INTEGER NOT NULL
                )
                "#,
                ENTRIES_TABLE
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS idx_{}_expire_time ON {} (expire_time)",
                ENTRIES_TABLE, ENTRIES_TABLE
            ),
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    key TEXT PRIMARY KEY,
                    day TEXT NOT NULL,
                    namespace TEXT NOT NULL,
                    hits INTEGER NOT NULL DEFAULT 0,
                    misses INTEGER NOT NULL DEFAULT 0
                )
                "#,
                STATS_TABLE
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (tenant TEXT PRIMARY KEY, config TEXT NOT NULL)",
                CONFIG_TABLE
            ),
        ];

        for sql in statements {
            sqlx::query(&sql).execute(&self.pool).await?;
        }

        info!("SQLite cache tables created or verified");
        Ok(())
    }

    fn entry_from_row(row: &sqlx::sqlite::SqliteRow) -> CacheResult<CacheEntry> {
        let tags_json: String = row.try_get("tags")?;
        let tags: BTreeSet<String> = serde_json::from_str(&tags_json)?;
        let value: Vec<u8> = row.try_get("value")?;

        Ok(CacheEntry {
            key: row.try_get("key")?,
            value: Bytes::from(value),
            created_at: from_millis(row.try_get("created_at")?)?,
            expires_at: from_millis(row.try_get("expire_time")?)?,
            tags,
            owner: row.try_get("tenant")?,
        })
    }
}

fn from_millis(ms: i64) -> CacheResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| CacheError::internal(format!("invalid timestamp {}", ms)))
}

#[async_trait]
impl PersistentTier for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn get(&self, key: &str) -> CacheResult<Option<CacheEntry>> {
        let sql = format!(
            "SELECT key, value, created_at, expire_time, tags, tenant FROM {} WHERE key = ? AND expire_time >= ?",
            ENTRIES_TABLE
        );
        let row = sqlx::query(&sql)
            .bind(key)
            .bind(Utc::now().timestamp_millis())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::entry_from_row).transpose()
    }

    async fn upsert(&self, entry: &CacheEntry) -> CacheResult<()> {
        let sql = format!(
            r#"
            INSERT INTO {} (key, value, ttl, expire_time, tags, tenant, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                ttl = excluded.ttl,
                expire_time = excluded.expire_time,
                tags = excluded.tags,
                tenant = excluded.tenant,
                created_at = excluded.created_at
            "#,
            ENTRIES_TABLE
        );

        sqlx::query(&sql)
            .bind(&entry.key)
            .bind(entry.value.as_ref())
            .bind(entry.ttl().as_millis() as i64)
            .bind(entry.expires_at.timestamp_millis())
            .bind(serde_json::to_string(&entry.tags)?)
            .bind(entry.owner.as_deref())
            .bind(entry.created_at.timestamp_millis())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let sql = format!("DELETE FROM {} WHERE key = ?", ENTRIES_TABLE);
        let result = sqlx::query(&sql).bind(key).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_by_tag(&self, tag: &str) -> CacheResult<Vec<String>> {
        let sql = format!(
            "DELETE FROM {table} WHERE EXISTS (SELECT 1 FROM json_each({table}.tags) WHERE json_each.value = ?) RETURNING key",
            table = ENTRIES_TABLE
        );
        let rows = sqlx::query(&sql).bind(tag).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("key").map_err(CacheError::from))
            .collect()
    }

    async fn delete_by_pattern(&self, pattern: &Regex) -> CacheResult<Vec<String>> {
        // SQLite has no native regex, so match keys here and delete inside one transaction.
        let select = format!("SELECT key FROM {}", ENTRIES_TABLE);
        let keys: Vec<String> = sqlx::query_scalar(&select).fetch_all(&self.pool).await?;
        let matched: Vec<String> = keys.into_iter().filter(|key| pattern.is_match(key)).collect();

        if matched.is_empty() {
            return Ok(matched);
        }

        let delete = format!("DELETE FROM {} WHERE key = ?", ENTRIES_TABLE);
        let mut tx = self.pool.begin().await?;
        let mut removed = Vec::with_capacity(matched.len());
        for key in matched {
            let result = sqlx::query(&delete).bind(&key).execute(&mut *tx).await?;
            if result.rows_affected() > 0 {
                removed.push(key);
            }
        }
        tx.commit().await?;

        Ok(removed)
    }

    async fn delete_expired(&self, before: DateTime<Utc>) -> CacheResult<u64> {
        let sql = format!("DELETE FROM {} WHERE expire_time < ?", ENTRIES_TABLE);
        let result = sqlx::query(&sql)
            .bind(before.timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn clear(&self) -> CacheResult<u64> {
        let sql = format!("DELETE FROM {}", ENTRIES_TABLE);
        let result = sqlx::query(&sql).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn counts(&self, now: DateTime<Utc>) -> CacheResult<DurableCounts> {
        let sql = format!(
            "SELECT COUNT(*) AS total, COALESCE(SUM(CASE WHEN expire_time < ? THEN 1 ELSE 0 END), 0) AS expired FROM {}",
            ENTRIES_TABLE
        );
        let row = sqlx::query(&sql)
            .bind(now.timestamp_millis())
            .fetch_one(&self.pool)
            .await?;

        Ok(DurableCounts {
            total: row.try_get::<i64, _>("total")? as u64,
            expired: row.try_get::<i64, _>("expired")? as u64,
        })
    }

    async fn health_check(&self) -> CacheResult<bool> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(true)
    }
}

#[async_trait]
impl StatsStore for SqliteStore {
    async fn increment(&self, day: NaiveDate, namespace: &str, hits: u64, misses: u64) -> CacheResult<()> {
        let sql = format!(
            r#"
            INSERT INTO {} (key, day, namespace, hits, misses) VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                hits = hits + excluded.hits,
                misses = misses + excluded.misses
            "#,
            STATS_TABLE
        );

        sqlx::query(&sql)
            .bind(stat_key(day, namespace))
            .bind(day.format("%Y-%m-%d").to_string())
            .bind(namespace)
            .bind(hits as i64)
            .bind(misses as i64)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn records(&self, from: NaiveDate, to: NaiveDate) -> CacheResult<Vec<StatRecord>> {
        let sql = format!(
            "SELECT day, namespace, hits, misses FROM {} WHERE day >= ? AND day <= ? ORDER BY day, namespace",
            STATS_TABLE
        );
        let rows = sqlx::query(&sql)
            .bind(from.format("%Y-%m-%d").to_string())
            .bind(to.format("%Y-%m-%d").to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> CacheResult<StatRecord> {
                let day: String = row.try_get("day")?;
                Ok(StatRecord {
                    day: NaiveDate::parse_from_str(&day, "%Y-%m-%d")
                        .map_err(|e| CacheError::internal(format!("invalid stat day '{}': {}", day, e)))?,
                    namespace: row.try_get("namespace")?,
                    hits: row.try_get::<i64, _>("hits")? as u64,
                    misses: row.try_get::<i64, _>("misses")? as u64,
                })
            })
            .collect()
    }
}

#[async_trait]
impl ConfigRepository for SqliteStore {
    async fn load_config(&self, tenant: &str) -> CacheResult<Option<CacheConfig>> {
        let sql = format!("SELECT config FROM {} WHERE tenant = ?", CONFIG_TABLE);
        let raw: Option<String> = sqlx::query_scalar(&sql)
            .bind(tenant)
            .fetch_optional(&self.pool)
            .await?;

        raw.map(|json| serde_json::from_str(&json).map_err(CacheError::from))
            .transpose()
    }

    async fn save_config(&self, tenant: &str, config: &CacheConfig) -> CacheResult<()> {
        let sql = format!(
            "INSERT INTO {} (tenant, config) VALUES (?, ?) ON CONFLICT(tenant) DO UPDATE SET config = excluded.config",
            CONFIG_TABLE
        );
        sqlx::query(&sql)
            .bind(tenant)
            .bind(serde_json::to_string(config)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
