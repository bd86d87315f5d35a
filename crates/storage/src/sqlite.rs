//! Embedded SQLite key-value store using sqlx.
//!
//! Single table `cache(key, value, timestamp)`; timestamps are Unix
//! milliseconds and entries older than the TTL read as absent. The on-disk
//! database runs in WAL mode so readers never block the writer.

use std::borrow::Cow;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use tracing::{debug, info, warn};

use crate::backend::{like_prefix_pattern, live_cutoff_ms, now_ms, KvBackend};
use crate::error::Result;

const SCHEMA: [&str; 2] = [
    r#"
    CREATE TABLE IF NOT EXISTS cache (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        timestamp INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_cache_timestamp ON cache(timestamp)",
];

pub struct SqliteBackend {
    pool: SqlitePool,
    ttl: Duration,
}

impl SqliteBackend {
    /// Open or create the database at the given path.
    pub async fn open(path: &Path, ttl: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("cache_size", Cow::Borrowed("-8000"))
            .pragma("temp_store", Cow::Borrowed("MEMORY"))
            .pragma("mmap_size", Cow::Borrowed("67108864"));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let backend = Self { pool, ttl };
        backend.create_schema().await?;

        info!(path = %path.display(), ttl_ms = ttl.as_millis() as u64, "Opened SQLite cache");
        Ok(backend)
    }

    /// Open an in-memory database (for testing).
    pub async fn open_memory(ttl: Duration) -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

        // One connection: every in-memory connection is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let backend = Self { pool, ttl };
        backend.create_schema().await?;
        Ok(backend)
    }

    async fn create_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    fn cutoff(&self) -> i64 {
        live_cutoff_ms(self.ttl, now_ms())
    }

    #[cfg(test)]
    async fn set_with_timestamp(&self, key: &str, value: &str, timestamp: i64) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO cache (key, value, timestamp) VALUES (?, ?, ?)")
            .bind(key)
            .bind(value)
            .bind(timestamp)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl KvBackend for SqliteBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String, i64)> =
            sqlx::query_as("SELECT value, timestamp FROM cache WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((_, timestamp)) if timestamp < self.cutoff() => {
                debug!(key, "Dropping expired cache entry");
                self.delete(key).await?;
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO cache (key, value, timestamp) VALUES (?, ?, ?)")
            .bind(key)
            .bind(value)
            .bind(now_ms())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM cache WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let keys: Vec<(String,)> = sqlx::query_as(
            "SELECT key FROM cache WHERE key LIKE ? ESCAPE '\\' AND timestamp >= ? ORDER BY key",
        )
        .bind(like_prefix_pattern(prefix))
        .bind(self.cutoff())
        .fetch_all(&self.pool)
        .await?;

        Ok(keys.into_iter().map(|(k,)| k).collect())
    }

    async fn count(&self) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM cache WHERE timestamp >= ?")
            .bind(self.cutoff())
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM cache").execute(&self.pool).await?;
        Ok(())
    }

    async fn size_bytes(&self) -> Result<Option<u64>> {
        let pages: std::result::Result<(i64,), sqlx::Error> =
            sqlx::query_as("SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()")
                .fetch_one(&self.pool)
                .await;

        match pages {
            Ok((bytes,)) => Ok(Some(bytes as u64)),
            Err(e) => {
                warn!(error = %e, "Could not read SQLite page statistics");
                Ok(None)
            }
        }
    }

    async fn purge_expired(&self) -> Result<u64> {
        if self.ttl.is_zero() {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM cache WHERE timestamp < ?")
            .bind(self.cutoff())
            .execute(&self.pool)
            .await?;

        let removed = result.rows_affected();
        if removed > 0 {
            info!(removed, "Purged expired cache entries");
        }
        Ok(removed)
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}
