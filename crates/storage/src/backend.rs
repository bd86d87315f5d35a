//! The key-value backend contract and backend selection.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, StorageError};
use crate::{FileBackend, MemoryBackend, PostgresBackend, RedisBackend, SqliteBackend};

/// A string-keyed store of JSON text blobs.
///
/// Implementations must make a `set` atomically visible: a concurrent `get`
/// returns either the previous or the new value, never a partial one.
/// Entries older than the backend's TTL read as absent.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Fetch a value, `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Insert or fully replace a value.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a value. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// All live keys starting with `prefix`, sorted.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Number of live entries.
    async fn count(&self) -> Result<u64>;

    /// Remove every entry.
    async fn clear(&self) -> Result<()>;

    /// Approximate storage footprint, when the backend can tell.
    async fn size_bytes(&self) -> Result<Option<u64>>;

    /// Delete expired entries in bulk, returning how many were removed.
    async fn purge_expired(&self) -> Result<u64>;

    /// Short backend name for logs and stats.
    fn name(&self) -> &'static str;

    /// Whether the backend's schema/connection is ready for use.
    fn is_initialized(&self) -> bool {
        true
    }
}

/// Available backend implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    #[default]
    File,
    Sqlite,
    Postgres,
    Redis,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::File => "file",
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
            Self::Redis => "redis",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "file" => Ok(Self::File),
            "sqlite" => Ok(Self::Sqlite),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "redis" => Ok(Self::Redis),
            other => Err(StorageError::InvalidConfig(format!(
                "unknown backend '{}'",
                other
            ))),
        }
    }
}

/// Everything needed to open a backend.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// Root directory for file storage; the SQLite database lives inside it.
    pub cache_dir: PathBuf,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    /// Namespace for the relational backend.
    pub cache_type: String,
    /// Entry lifetime, zero for never.
    pub ttl: Duration,
}

impl BackendConfig {
    pub fn new(kind: BackendKind, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            cache_dir: cache_dir.into(),
            database_url: None,
            redis_url: None,
            cache_type: "snow_cover".to_string(),
            ttl: Duration::ZERO,
        }
    }

    /// SQLite database file used by the sqlite backend.
    pub fn sqlite_path(&self) -> PathBuf {
        self.cache_dir.join("snow_cover.sqlite")
    }

    /// Open the configured backend, creating schemas where needed.
    pub async fn connect(&self) -> Result<Arc<dyn KvBackend>> {
        let backend: Arc<dyn KvBackend> = match self.kind {
            BackendKind::Memory => Arc::new(MemoryBackend::new(self.ttl)),
            BackendKind::File => Arc::new(FileBackend::open(&self.cache_dir).await?),
            BackendKind::Sqlite => Arc::new(SqliteBackend::open(&self.sqlite_path(), self.ttl).await?),
            BackendKind::Postgres => {
                let url = self.database_url.as_deref().ok_or_else(|| {
                    StorageError::InvalidConfig("postgres backend needs a database URL".into())
                })?;
                let backend = PostgresBackend::connect(url, &self.cache_type, self.ttl).await?;
                backend.migrate().await?;
                Arc::new(backend)
            }
            BackendKind::Redis => {
                let url = self.redis_url.as_deref().ok_or_else(|| {
                    StorageError::InvalidConfig("redis backend needs a Redis URL".into())
                })?;
                Arc::new(RedisBackend::connect(url, self.ttl).await?)
            }
        };

        info!(backend = backend.name(), "Opened storage backend");
        Ok(backend)
    }
}

/// Milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Oldest timestamp that is still live, or `i64::MIN` when entries never expire.
pub(crate) fn live_cutoff_ms(ttl: Duration, now_ms: i64) -> i64 {
    if ttl.is_zero() {
        i64::MIN
    } else {
        now_ms.saturating_sub(ttl.as_millis() as i64)
    }
}

/// SQL `LIKE` pattern matching keys that start with `prefix` (escape char `\`).
pub(crate) fn like_prefix_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}
