//! One-JSON-file-per-key backend.
//!
//! A key `a:b:c` is stored at `{root}/a/b/c.json`, so the archive key
//! `snow_cover:h18v04:1500:1000` lands in
//! `{root}/snow_cover/h18v04/1500/1000.json`. Writes go through a sibling
//! temp file and a rename.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::backend::KvBackend;
use crate::error::{Result, StorageError};

const EXTENSION: &str = "json";

pub struct FileBackend {
    root: PathBuf,
    tmp_counter: AtomicU64,
}

impl FileBackend {
    /// Open (and create) a file store rooted at `root`.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;
        info!(root = %root.display(), "Opened file cache");
        Ok(Self {
            root,
            tmp_counter: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file holding `key`.
    pub fn path_for(&self, key: &str) -> Result<PathBuf> {
        let segments: Vec<&str> = key.split(':').collect();
        let valid = segments.iter().all(|s| {
            !s.is_empty() && *s != "." && *s != ".." && !s.contains(['/', '\\'])
        });
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }

        let mut path = self.root.clone();
        for segment in &segments[..segments.len() - 1] {
            path.push(segment);
        }
        path.push(format!("{}.{}", segments[segments.len() - 1], EXTENSION));
        Ok(path)
    }

    /// Key stored at `path`, if it is a cache file under the root.
    fn key_for(&self, path: &Path) -> Option<String> {
        if path.extension()? != EXTENSION {
            return None;
        }
        let relative = path.strip_prefix(&self.root).ok()?.with_extension("");
        let segments: Option<Vec<&str>> = relative.iter().map(|s| s.to_str()).collect();
        Some(segments?.join(":"))
    }

    /// Every cache file under the root with its size.
    async fn walk(&self) -> Result<Vec<(String, u64)>> {
        let root = self.root.clone();
        let files = tokio::task::spawn_blocking(move || {
            WalkDir::new(&root)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .map(|e| {
                    let size = e.metadata().map(|m| m.len()).unwrap_or(0);
                    (e.into_path(), size)
                })
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| StorageError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

        let mut entries: Vec<(String, u64)> = files
            .into_iter()
            .filter_map(|(path, size)| self.key_for(&path).map(|k| (k, size)))
            .collect();
        entries.sort();
        Ok(entries)
    }
}

#[async_trait]
impl KvBackend for FileBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let n = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("{}.{}.tmp", EXTENSION, n));
        tokio::fs::write(&tmp, value).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        debug!(path = %path.display(), "Wrote cache file");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .walk()
            .await?
            .into_iter()
            .map(|(k, _)| k)
            .filter(|k| k.starts_with(prefix))
            .collect())
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.walk().await?.len() as u64)
    }

    async fn clear(&self) -> Result<()> {
        for (key, _) in self.walk().await? {
            self.delete(&key).await?;
        }
        Ok(())
    }

    async fn size_bytes(&self) -> Result<Option<u64>> {
        Ok(Some(self.walk().await?.iter().map(|(_, size)| size).sum()))
    }

    async fn purge_expired(&self) -> Result<u64> {
        // Files never expire.
        Ok(0)
    }

    fn name(&self) -> &'static str {
        "file"
    }
}
