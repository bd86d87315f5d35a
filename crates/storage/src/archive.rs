//! The pixel archive: one yearly/weekly observation history per pixel.
//!
//! Each pixel is stored as a single JSON blob under
//! `snow_cover:{tile}:{row}:{col}`:
//!
//! ```text
//! [{"year":2024,"data":[[85,0],[92,1],[null,0],...]}, ...]
//! ```
//!
//! Records are kept sorted by year and the whole blob is rewritten on every
//! update. Every read-modify-write goes through a per-pixel async lock.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{Datelike, NaiveDate};
use snow_common::observation::WEEKS_PER_YEAR;
use snow_common::{week_date, week_index, DateWindow, PixelKey, PixelPos, TileId, WeekObservation, YearRecord};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, instrument, warn};

use crate::backend::KvBackend;
use crate::error::{Result, StorageError};

/// Prefix of every archive key.
pub const KEY_PREFIX: &str = "snow_cover:";

/// Write one observation into a pixel's records, creating the year if needed.
pub fn apply_observation(records: &mut Vec<YearRecord>, date: NaiveDate, observation: WeekObservation) {
    let year = date.year();
    let position = records.iter().position(|r| r.year == year);
    let record = match position {
        Some(i) => &mut records[i],
        None => {
            records.push(YearRecord::empty(year));
            let last = records.len() - 1;
            &mut records[last]
        }
    };
    record.set_week(week_index(date), observation);
    records.sort_by_key(|r| r.year);
}

/// Weeks inside `window` that still need a fetch.
///
/// Every slot 0-52 of each year the window touches is checked, then kept
/// only if its anchor date lies inside the window. A week is missing when
/// its year or slot is absent, its value is null, or it holds the retryable
/// code.
pub fn missing_weeks_in(records: &[YearRecord], window: &DateWindow) -> Vec<(NaiveDate, usize)> {
    let mut missing = Vec::new();
    for year in window.years() {
        let record = records.iter().find(|r| r.year == year);
        for week in 0..WEEKS_PER_YEAR {
            let Some(date) = week_date(year, week) else {
                continue;
            };
            if !window.contains(date) {
                continue;
            }
            let needs_fetch = record
                .and_then(|r| r.week(week))
                .map_or(true, WeekObservation::needs_fetch);
            if needs_fetch {
                missing.push((date, week));
            }
        }
    }
    missing
}

/// Reset cells holding one of `codes` whose week date is before `cutoff`.
fn reset_stale(records: &mut [YearRecord], cutoff: NaiveDate, codes: &[i32]) -> bool {
    let mut changed = false;
    for record in records.iter_mut() {
        for week in 0..record.data.len() {
            let Some(value) = record.data[week].value() else {
                continue;
            };
            let stale = record.week_date(week).is_some_and(|d| d < cutoff);
            if stale && codes.contains(&value) {
                record.data[week] = WeekObservation::EMPTY;
                changed = true;
            }
        }
    }
    changed
}

/// Async mutexes keyed by pixel; entries are dropped when nobody holds or
/// waits on them.
#[derive(Default)]
struct KeyLocks {
    inner: Mutex<HashMap<PixelKey, Arc<tokio::sync::Mutex<()>>>>,
}

struct KeyGuard {
    key: PixelKey,
    locks: Arc<KeyLocks>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyLocks {
    async fn lock(self: &Arc<Self>, key: PixelKey) -> KeyGuard {
        let mutex = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(map.entry(key).or_default())
        };
        let guard = mutex.lock_owned().await;
        KeyGuard {
            key,
            locks: Arc::clone(self),
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        let mut map = self.locks.inner.lock().unwrap_or_else(PoisonError::into_inner);
        // The map and this guard hold the only references: no waiters.
        if map
            .get(&self.key)
            .is_some_and(|m| Arc::strong_count(m) <= 2)
        {
            map.remove(&self.key);
        }
        self.guard.take();
    }
}

/// Archive size summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveStats {
    pub backend: &'static str,
    pub entry_count: u64,
    pub tile_count: usize,
    pub total_size_bytes: Option<u64>,
}

impl fmt::Display for ArchiveStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} cache: {} pixel entries across {} tiles",
            self.backend, self.entry_count, self.tile_count
        )?;
        if let Some(bytes) = self.total_size_bytes {
            write!(f, ", {}", format_bytes(bytes))?;
        }
        Ok(())
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Per-pixel weekly snow-cover history on top of a [`KvBackend`].
#[derive(Clone)]
pub struct PixelArchive {
    backend: Arc<dyn KvBackend>,
    locks: Arc<KeyLocks>,
}

impl PixelArchive {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self {
            backend,
            locks: Arc::new(KeyLocks::default()),
        }
    }

    /// Storage key of a pixel.
    pub fn storage_key(key: &PixelKey) -> String {
        format!("{}{}", KEY_PREFIX, key)
    }

    /// Pixel addressed by a storage key, if it is an archive key.
    pub fn parse_storage_key(key: &str) -> Option<PixelKey> {
        key.strip_prefix(KEY_PREFIX)?.parse().ok()
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Fail unless the backend is ready for use.
    pub fn ensure_ready(&self) -> Result<()> {
        if self.backend.is_initialized() {
            Ok(())
        } else {
            Err(StorageError::NotInitialized(self.backend.name()))
        }
    }

    /// All yearly records of a pixel, sorted by year.
    ///
    /// A missing entry is empty. A corrupt entry is logged, deleted and
    /// treated as empty.
    pub async fn load(&self, key: &PixelKey) -> Result<Vec<YearRecord>> {
        match self.read(key).await? {
            Some(records) => Ok(records),
            None => {
                // Re-check under the lock so a concurrent writer's fresh
                // entry is never deleted.
                let _guard = self.locks.lock(*key).await;
                if self.read(key).await?.is_none() {
                    self.discard(key).await;
                }
                Ok(Vec::new())
            }
        }
    }

    /// Decoded records, or `None` when the stored blob is corrupt.
    async fn read(&self, key: &PixelKey) -> Result<Option<Vec<YearRecord>>> {
        let Some(blob) = self.backend.get(&Self::storage_key(key)).await? else {
            return Ok(Some(Vec::new()));
        };

        match serde_json::from_str::<Vec<YearRecord>>(&blob) {
            Ok(mut records) => {
                records.sort_by_key(|r| r.year);
                Ok(Some(records))
            }
            Err(e) => {
                warn!(pixel = %key, error = %e, "Corrupt archive entry, discarding");
                Ok(None)
            }
        }
    }

    /// Delete a corrupt entry. Callers hold the key's lock.
    async fn discard(&self, key: &PixelKey) {
        if let Err(e) = self.backend.delete(&Self::storage_key(key)).await {
            warn!(pixel = %key, error = %e, "Failed to delete corrupt entry");
        }
    }

    /// Replace a pixel's records.
    pub async fn save(&self, key: &PixelKey, mut records: Vec<YearRecord>) -> Result<()> {
        records.sort_by_key(|r| r.year);
        self.write(key, &records).await
    }

    async fn write(&self, key: &PixelKey, records: &[YearRecord]) -> Result<()> {
        let blob = serde_json::to_string(records)?;
        self.backend.set(&Self::storage_key(key), &blob).await
    }

    /// Load, mutate and save a pixel under its lock.
    ///
    /// `f` returns whether it changed anything; unchanged entries are not
    /// written back. Returns that flag.
    pub async fn modify<F>(&self, key: &PixelKey, f: F) -> Result<bool>
    where
        F: FnOnce(&mut Vec<YearRecord>) -> bool + Send,
    {
        let _guard = self.locks.lock(*key).await;
        let (mut records, corrupt) = match self.read(key).await? {
            Some(records) => (records, false),
            None => (Vec::new(), true),
        };
        if !f(&mut records) {
            if corrupt {
                self.discard(key).await;
            }
            return Ok(false);
        }
        records.sort_by_key(|r| r.year);
        self.write(key, &records).await?;
        Ok(true)
    }

    /// Weeks of `window` this pixel still needs, in date order.
    pub async fn missing_weeks(
        &self,
        key: &PixelKey,
        window: &DateWindow,
    ) -> Result<Vec<(NaiveDate, usize)>> {
        let records = self.load(key).await?;
        Ok(missing_weeks_in(&records, window))
    }

    /// Set a single week cell.
    pub async fn update_week(
        &self,
        key: &PixelKey,
        date: NaiveDate,
        value: i32,
        cloud_persistence: u32,
    ) -> Result<()> {
        let observation = WeekObservation::new(value, cloud_persistence);
        self.modify(key, |records| {
            apply_observation(records, date, observation);
            true
        })
        .await?;
        Ok(())
    }

    /// Apply many week updates with one load and one save.
    pub async fn apply_updates(
        &self,
        key: &PixelKey,
        updates: &[(NaiveDate, WeekObservation)],
    ) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }
        self.modify(key, |records| {
            for (date, observation) in updates {
                apply_observation(records, *date, *observation);
            }
            true
        })
        .await?;
        Ok(())
    }

    /// Reset cells holding one of `codes` dated before `cutoff` to empty.
    ///
    /// Returns the number of pixel entries that changed. An entry that
    /// cannot be read or written is logged and skipped; only a failed key
    /// listing is an error.
    #[instrument(skip(self, codes), fields(backend = self.backend.name()))]
    pub async fn cleanup_stale_retryable(&self, cutoff: NaiveDate, codes: &[i32]) -> Result<usize> {
        let mut modified = 0;
        let mut failed = 0;
        for key in self.keys().await? {
            match self
                .modify(&key, |records| reset_stale(records, cutoff, codes))
                .await
            {
                Ok(true) => {
                    debug!(pixel = %key, "Reset stale error codes");
                    modified += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(pixel = %key, error = %e, "Failed to clean up pixel, skipping");
                    failed += 1;
                }
            }
        }
        if failed > 0 {
            warn!(modified, failed, ?codes, %cutoff, "Cleaned up stale error codes with failures");
        } else {
            info!(modified, ?codes, %cutoff, "Cleaned up stale error codes");
        }
        Ok(modified)
    }

    /// Every pixel present in the archive.
    pub async fn keys(&self) -> Result<Vec<PixelKey>> {
        let raw = self.backend.scan_prefix(KEY_PREFIX).await?;
        Ok(raw
            .iter()
            .filter_map(|k| {
                let parsed = Self::parse_storage_key(k);
                if parsed.is_none() {
                    warn!(key = %k, "Ignoring unparsable archive key");
                }
                parsed
            })
            .collect())
    }

    /// Archived pixels grouped by tile.
    pub async fn discover_pixels(&self) -> Result<BTreeMap<TileId, Vec<PixelPos>>> {
        let mut by_tile: BTreeMap<TileId, Vec<PixelPos>> = BTreeMap::new();
        for key in self.keys().await? {
            by_tile.entry(key.tile).or_default().push(key.pos);
        }
        for pixels in by_tile.values_mut() {
            pixels.sort();
            pixels.dedup();
        }
        Ok(by_tile)
    }

    /// Remove every entry of the backend.
    pub async fn clear(&self) -> Result<()> {
        self.backend.clear().await?;
        info!(backend = self.backend.name(), "Cleared archive");
        Ok(())
    }

    pub async fn stats(&self) -> Result<ArchiveStats> {
        let keys = self.keys().await?;
        let tiles: BTreeSet<TileId> = keys.iter().map(|k| k.tile).collect();
        Ok(ArchiveStats {
            backend: self.backend.name(),
            entry_count: keys.len() as u64,
            tile_count: tiles.len(),
            total_size_bytes: self.backend.size_bytes().await?,
        })
    }

    #[cfg(test)]
    fn held_locks(&self) -> usize {
        self.locks.len()
    }
}
