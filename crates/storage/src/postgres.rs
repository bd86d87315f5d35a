//! PostgreSQL key-value store.
//!
//! Entries live in a shared `cache` table namespaced by `cache_type`, with
//! values stored as JSONB so they can be inspected with SQL.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::info;

use crate::backend::{like_prefix_pattern, live_cutoff_ms, now_ms, KvBackend};
use crate::error::{Result, StorageError};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS cache (
    key TEXT NOT NULL,
    cache_type TEXT NOT NULL,
    value JSONB NOT NULL,
    timestamp BIGINT NOT NULL,
    PRIMARY KEY (cache_type, key)
);

CREATE INDEX IF NOT EXISTS idx_cache_type_timestamp ON cache(cache_type, timestamp)
"#;

pub struct PostgresBackend {
    pool: PgPool,
    cache_type: String,
    ttl: Duration,
    initialized: AtomicBool,
}

impl PostgresBackend {
    /// Connect to the database. Call [`migrate`](Self::migrate) before use.
    pub async fn connect(database_url: &str, cache_type: &str, ttl: Duration) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Database(format!("Connection failed: {}", e)))?;

        Ok(Self {
            pool,
            cache_type: cache_type.to_string(),
            ttl,
            initialized: AtomicBool::new(false),
        })
    }

    /// Create the cache table if needed.
    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA_SQL.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                sqlx::query(trimmed)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| StorageError::Database(format!("Migration failed: {}", e)))?;
            }
        }

        self.initialized.store(true, Ordering::Release);
        info!(cache_type = %self.cache_type, "PostgreSQL cache ready");
        Ok(())
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(StorageError::NotInitialized("postgres"))
        }
    }

    fn cutoff(&self) -> i64 {
        live_cutoff_ms(self.ttl, now_ms())
    }
}

#[async_trait]
impl KvBackend for PostgresBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.ensure_initialized()?;

        let row: Option<(String, i64)> = sqlx::query_as(
            "SELECT value::text, timestamp FROM cache WHERE cache_type = $1 AND key = $2",
        )
        .bind(&self.cache_type)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((_, timestamp)) if timestamp < self.cutoff() => {
                self.delete(key).await?;
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.ensure_initialized()?;

        sqlx::query(
            r#"
            INSERT INTO cache (key, cache_type, value, timestamp)
            VALUES ($1, $2, $3::jsonb, $4)
            ON CONFLICT (cache_type, key)
            DO UPDATE SET value = EXCLUDED.value, timestamp = EXCLUDED.timestamp
            "#,
        )
        .bind(key)
        .bind(&self.cache_type)
        .bind(value)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.ensure_initialized()?;

        sqlx::query("DELETE FROM cache WHERE cache_type = $1 AND key = $2")
            .bind(&self.cache_type)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.ensure_initialized()?;

        let keys: Vec<(String,)> = sqlx::query_as(
            "SELECT key FROM cache \
             WHERE cache_type = $1 AND key LIKE $2 ESCAPE '\\' AND timestamp >= $3 \
             ORDER BY key",
        )
        .bind(&self.cache_type)
        .bind(like_prefix_pattern(prefix))
        .bind(self.cutoff())
        .fetch_all(&self.pool)
        .await?;

        Ok(keys.into_iter().map(|(k,)| k).collect())
    }

    async fn count(&self) -> Result<u64> {
        self.ensure_initialized()?;

        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM cache WHERE cache_type = $1 AND timestamp >= $2")
                .bind(&self.cache_type)
                .bind(self.cutoff())
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }

    async fn clear(&self) -> Result<()> {
        self.ensure_initialized()?;

        sqlx::query("DELETE FROM cache WHERE cache_type = $1")
            .bind(&self.cache_type)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn size_bytes(&self) -> Result<Option<u64>> {
        self.ensure_initialized()?;

        let (bytes,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(pg_column_size(value) + octet_length(key)), 0)::BIGINT \
             FROM cache WHERE cache_type = $1",
        )
        .bind(&self.cache_type)
        .fetch_one(&self.pool)
        .await?;
        Ok(Some(bytes as u64))
    }

    async fn purge_expired(&self) -> Result<u64> {
        self.ensure_initialized()?;
        if self.ttl.is_zero() {
            return Ok(0);
        }

        let result = sqlx::query("DELETE FROM cache WHERE cache_type = $1 AND timestamp < $2")
            .bind(&self.cache_type)
            .bind(self.cutoff())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    fn name(&self) -> &'static str {
        "postgres"
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_statements() {
        let statements: Vec<&str> = SCHEMA_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        assert_eq!(statements.len(), 2);
        assert!(statements[0].contains("PRIMARY KEY (cache_type, key)"));
        assert!(statements[1].starts_with("CREATE INDEX IF NOT EXISTS"));
    }
}
