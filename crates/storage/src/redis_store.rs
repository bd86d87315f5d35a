//! Redis key-value store with native TTL.

use std::time::Duration;

use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};

use crate::backend::KvBackend;
use crate::error::{Result, StorageError};

const SCAN_BATCH: usize = 1000;

pub struct RedisBackend {
    conn: MultiplexedConnection,
    ttl: Duration,
}

impl RedisBackend {
    /// Connect to Redis.
    pub async fn connect(redis_url: &str, ttl: Duration) -> Result<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| StorageError::Cache(format!("Redis connection failed: {}", e)))?;

        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StorageError::Cache(format!("Redis connection failed: {}", e)))?;

        Ok(Self { conn, ttl })
    }

    /// SCAN every key matching a glob pattern.
    async fn scan_match(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(|e| StorageError::Cache(format!("Pattern search failed: {}", e)))?;

            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once.
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

/// Glob pattern matching keys that start with `prefix`.
fn match_prefix_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('*');
    pattern
}

#[async_trait]
impl KvBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| StorageError::Cache(format!("Cache get failed: {}", e)))?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<()> = if self.ttl.is_zero() {
            conn.set(key, value).await
        } else {
            conn.set_ex(key, value, self.ttl.as_secs().max(1)).await
        };
        result.map_err(|e| StorageError::Cache(format!("Cache set failed: {}", e)))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .del(key)
            .await
            .map_err(|e| StorageError::Cache(format!("Cache delete failed: {}", e)))?;
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.scan_match(&match_prefix_pattern(prefix)).await
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.scan_match("*").await?.len() as u64)
    }

    async fn clear(&self) -> Result<()> {
        let keys = self.scan_match("*").await?;
        let mut conn = self.conn.clone();
        for chunk in keys.chunks(SCAN_BATCH) {
            let _: () = conn
                .del(chunk.to_vec())
                .await
                .map_err(|e| StorageError::Cache(format!("Delete failed: {}", e)))?;
        }
        Ok(())
    }

    async fn size_bytes(&self) -> Result<Option<u64>> {
        let mut conn = self.conn.clone();
        let info: String = redis::cmd("INFO")
            .arg("memory")
            .query_async(&mut conn)
            .await
            .map_err(|e| StorageError::Cache(format!("Info failed: {}", e)))?;

        Ok(parse_used_memory(&info))
    }

    async fn purge_expired(&self) -> Result<u64> {
        // Redis expires keys itself.
        Ok(0)
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

fn parse_used_memory(info: &str) -> Option<u64> {
    info.lines()
        .find_map(|line| line.strip_prefix("used_memory:"))
        .and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_prefix_pattern() {
        assert_eq!(match_prefix_pattern("snow_cover:"), "snow_cover:*");
        assert_eq!(match_prefix_pattern("a*b?[c]"), "a\\*b\\?\\[c\\]*");
        assert_eq!(match_prefix_pattern(""), "*");
    }

    #[test]
    fn test_parse_used_memory() {
        let info = "# Memory\r\nused_memory:1048576\r\nused_memory_human:1.00M\r\n";
        assert_eq!(parse_used_memory(info), Some(1_048_576));
        assert_eq!(parse_used_memory("# Memory\r\n"), None);
    }

    #[test]
    fn test_invalid_url_is_cache_error() {
        let result = tokio_test::block_on(RedisBackend::connect("not a url", Duration::ZERO));
        assert!(matches!(result, Err(StorageError::Cache(_))));
    }
}
