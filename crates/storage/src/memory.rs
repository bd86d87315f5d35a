//! In-process backend for tests and dry runs.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::backend::KvBackend;
use crate::error::Result;

struct Entry {
    value: String,
    inserted_at: Instant,
}

/// A `BTreeMap` behind an async `RwLock`, with lazy TTL expiry.
pub struct MemoryBackend {
    entries: RwLock<BTreeMap<String, Entry>>,
    ttl: Duration,
}

impl MemoryBackend {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            ttl,
        }
    }

    fn is_live(&self, entry: &Entry) -> bool {
        self.ttl.is_zero() || entry.inserted_at.elapsed() <= self.ttl
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if self.is_live(entry) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
            }
        }
        self.entries.write().await.remove(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.write().await.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                inserted_at: Instant::now(),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let entries = self.entries.read().await;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter(|(_, e)| self.is_live(e))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn count(&self) -> Result<u64> {
        let entries = self.entries.read().await;
        Ok(entries.values().filter(|e| self.is_live(e)).count() as u64)
    }

    async fn clear(&self) -> Result<()> {
        self.entries.write().await.clear();
        Ok(())
    }

    async fn size_bytes(&self) -> Result<Option<u64>> {
        let entries = self.entries.read().await;
        let bytes = entries
            .iter()
            .map(|(k, e)| (k.len() + e.value.len()) as u64)
            .sum();
        Ok(Some(bytes))
    }

    async fn purge_expired(&self) -> Result<u64> {
        if self.ttl.is_zero() {
            return Ok(0);
        }
        let mut entries = self.entries.write().await;
        let before = entries.len();
        let ttl = self.ttl;
        entries.retain(|_, e| e.inserted_at.elapsed() <= ttl);
        Ok((before - entries.len()) as u64)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let backend = MemoryBackend::default();
        assert_eq!(backend.get("a").await.unwrap(), None);

        backend.set("a", "1").await.unwrap();
        backend.set("a", "2").await.unwrap();
        assert_eq!(backend.get("a").await.unwrap().as_deref(), Some("2"));
        assert_eq!(backend.count().await.unwrap(), 1);

        backend.delete("a").await.unwrap();
        backend.delete("a").await.unwrap();
        assert_eq!(backend.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_scan_prefix_is_sorted_and_bounded() {
        let backend = MemoryBackend::default();
        for key in ["p:b", "p:a", "q:a", "p"] {
            backend.set(key, "{}").await.unwrap();
        }

        assert_eq!(backend.scan_prefix("p:").await.unwrap(), vec!["p:a", "p:b"]);
        assert_eq!(backend.scan_prefix("").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_expired_entries_read_as_absent() {
        let backend = MemoryBackend::new(Duration::from_millis(20));
        backend.set("k", "v").await.unwrap();
        assert!(backend.get("k").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(backend.count().await.unwrap(), 0);
        assert!(backend.scan_prefix("").await.unwrap().is_empty());
        assert_eq!(backend.purge_expired().await.unwrap(), 1);
        assert_eq!(backend.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clear_and_size() {
        let backend = MemoryBackend::default();
        backend.set("ab", "cde").await.unwrap();
        assert_eq!(backend.size_bytes().await.unwrap(), Some(5));

        backend.clear().await.unwrap();
        assert_eq!(backend.count().await.unwrap(), 0);
    }
}
