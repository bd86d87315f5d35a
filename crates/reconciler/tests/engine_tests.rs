//! End-to-end reconciliation runs against an in-memory archive.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reconciler::{FixedClock, ReconcileError, Reconciler, ReconcilerConfig};
use snow_common::{codes, DateWindow, PixelKey, PixelPos, TileId, WeekObservation};
use storage::{KvBackend, MemoryBackend, PixelArchive, StorageError};
use test_utils::fixtures::dates;
use test_utils::sources::{synthetic_value, Behavior, ScriptedSource};

fn date(s: &str) -> NaiveDate {
    dates::date(s)
}

fn window(start: &str, end: &str) -> DateWindow {
    DateWindow::new(date(start), date(end)).unwrap()
}

fn tile(s: &str) -> TileId {
    s.parse().unwrap()
}

fn archive() -> PixelArchive {
    PixelArchive::new(Arc::new(MemoryBackend::default()))
}

fn reconciler(archive: &PixelArchive, source: &Arc<ScriptedSource>, config: ReconcilerConfig) -> Reconciler {
    Reconciler::new(archive.clone(), source.clone(), config)
        .with_clock(Arc::new(FixedClock(date(dates::TODAY))))
}

fn two_pixels() -> BTreeMap<TileId, Vec<PixelPos>> {
    BTreeMap::from([(
        tile("h18v04"),
        vec![PixelPos::new(1500, 1000), PixelPos::new(1500, 1001)],
    )])
}

async fn week(archive: &PixelArchive, tile_id: &str, pos: PixelPos, on: &str) -> WeekObservation {
    let key = PixelKey::new(tile(tile_id), pos.row, pos.col);
    let records = archive.load(&key).await.unwrap();
    let on = date(on);
    records
        .iter()
        .find(|r| r.year == chrono::Datelike::year(&on))
        .and_then(|r| r.week(snow_common::week_index(on)).copied())
        .unwrap_or(WeekObservation::EMPTY)
}

#[tokio::test]
async fn test_run_fills_gaps_then_is_idempotent() {
    let archive = archive();
    let source = Arc::new(ScriptedSource::default());
    let engine = reconciler(&archive, &source, ReconcilerConfig::default());
    let pixels = two_pixels();
    let january = window("2024-01-01", "2024-01-31");

    let first = engine.run(&pixels, &january).await.unwrap();
    assert_eq!(first.missing.pixels, 2);
    assert_eq!(first.missing.missing_cells, 10);
    assert_eq!(first.tiles_processed, 1);
    assert_eq!(first.stats.processed_weeks, 5);
    assert_eq!(first.stats.pixels_updated, 2);
    assert_eq!(first.stats.cells_written, 10);
    assert_eq!(first.stats.errors, 0);
    assert!(first.is_success());

    // One fetch per date covering both pixels.
    let calls = source.calls();
    assert_eq!(calls.len(), 5);
    assert!(calls.iter().all(|c| c.pixels.len() == 2));
    assert_eq!(calls[0].date, date("2024-01-01"));
    assert_eq!(calls[4].date, date("2024-01-29"));

    let pos = PixelPos::new(1500, 1000);
    assert_eq!(
        week(&archive, "h18v04", pos, "2024-01-15").await,
        synthetic_value(pos, date("2024-01-15"))
    );

    let second = engine.run(&pixels, &january).await.unwrap();
    assert!(second.missing.is_complete());
    assert_eq!(second.stats.pixels_updated, 0);
    assert_eq!(second.tiles_processed, 0);
    assert_eq!(source.call_count(), 5);
}

#[tokio::test]
async fn test_only_needing_pixels_are_requested() {
    let archive = archive();
    let known = PixelPos::new(1500, 1000);
    archive
        .update_week(&PixelKey::new(tile("h18v04"), known.row, known.col), date("2024-01-01"), 50, 0)
        .await
        .unwrap();

    let source = Arc::new(ScriptedSource::default());
    let engine = reconciler(&archive, &source, ReconcilerConfig::default());
    let summary = engine
        .run(&two_pixels(), &window("2024-01-01", "2024-01-08"))
        .await
        .unwrap();

    let calls = source.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].pixels, vec![PixelPos::new(1500, 1001)]);
    assert_eq!(calls[1].pixels.len(), 2);
    assert_eq!(summary.stats.cells_written, 3);
    assert_eq!(week(&archive, "h18v04", known, "2024-01-01").await, WeekObservation::new(50, 0));
}

#[tokio::test]
async fn test_unavailable_is_coded_by_age() {
    let archive = archive();
    // Today is 2024-06-15: January is old, June 3 and 10 are recent.
    let source = Arc::new(
        ScriptedSource::default()
            .with_date(date("2024-01-08"), Behavior::Unavailable)
            .with_date(date("2024-06-03"), Behavior::Unavailable),
    );
    let engine = reconciler(&archive, &source, ReconcilerConfig::default());
    let pixels = two_pixels();
    let pos = PixelPos::new(1500, 1001);

    let old = engine
        .run(&pixels, &window("2024-01-01", "2024-01-08"))
        .await
        .unwrap();
    assert_eq!(old.stats.errors, 2);
    assert!(!old.is_success());
    assert_eq!(
        week(&archive, "h18v04", pos, "2024-01-08").await.value(),
        Some(codes::OLD_MISSING)
    );

    let recent = engine
        .run(&pixels, &window("2024-06-03", "2024-06-10"))
        .await
        .unwrap();
    assert_eq!(recent.stats.errors, 2);
    assert_eq!(
        week(&archive, "h18v04", pos, "2024-06-03").await.value(),
        Some(codes::RECENT_MISSING)
    );
    assert!(!week(&archive, "h18v04", pos, "2024-06-10").await.is_error());

    // 400 is retried, 301 is not.
    let before = source.call_count();
    let rerun = engine
        .run(&pixels, &window("2024-01-01", "2024-06-10"))
        .await
        .unwrap();
    // Weeks 2-21 were never fetched; week 22 holds a retryable 400.
    assert_eq!(rerun.missing.missing_cells, 2 * 21);
    let retried: Vec<NaiveDate> = source.calls().iter().map(|c| c.date).collect();
    assert!(retried.contains(&date("2024-06-03")));
    assert_eq!(
        source
            .calls()
            .iter()
            .filter(|c| c.date == date("2024-01-08"))
            .count(),
        1
    );
    assert!(source.call_count() > before);
}

#[tokio::test]
async fn test_failure_and_panic_record_other() {
    let archive = archive();
    let source = Arc::new(
        ScriptedSource::default()
            .with_date(date("2024-01-01"), Behavior::Failed)
            .with_date(date("2024-01-08"), Behavior::Panic),
    );
    let engine = reconciler(&archive, &source, ReconcilerConfig::default());
    let pixels = two_pixels();
    let span = window("2024-01-01", "2024-01-15");

    let summary = engine.run(&pixels, &span).await.unwrap();
    assert_eq!(summary.stats.processed_weeks, 3);
    assert_eq!(summary.stats.errors, 4);
    assert_eq!(summary.stats.pixels_updated, 2);

    let pos = PixelPos::new(1500, 1000);
    assert_eq!(week(&archive, "h18v04", pos, "2024-01-01").await, WeekObservation::new(codes::OTHER, 0));
    assert_eq!(week(&archive, "h18v04", pos, "2024-01-08").await, WeekObservation::new(codes::OTHER, 0));
    assert!(!week(&archive, "h18v04", pos, "2024-01-15").await.is_error());

    // 401 is permanent.
    let again = engine.run(&pixels, &span).await.unwrap();
    assert!(again.missing.is_complete());
}

#[tokio::test]
async fn test_omitted_pixel_gets_other_code() {
    let archive = archive();
    let dropped = PixelPos::new(1500, 1001);
    let source = Arc::new(
        ScriptedSource::default().with_date(date("2024-01-01"), Behavior::Omit(vec![dropped])),
    );
    let engine = reconciler(&archive, &source, ReconcilerConfig::default());

    let summary = engine
        .run(&two_pixels(), &window("2024-01-01", "2024-01-01"))
        .await
        .unwrap();
    assert_eq!(summary.stats.errors, 1);
    assert_eq!(week(&archive, "h18v04", dropped, "2024-01-01").await.value(), Some(codes::OTHER));
    assert!(!week(&archive, "h18v04", PixelPos::new(1500, 1000), "2024-01-01")
        .await
        .is_error());
}

#[tokio::test]
async fn test_worker_limit_bounds_concurrent_fetches() {
    let archive = archive();
    let source = Arc::new(ScriptedSource::default().with_delay(Duration::from_millis(20)));
    let config = ReconcilerConfig {
        max_workers: 2,
        max_tiles: None,
    };
    let engine = reconciler(&archive, &source, config);

    // Ten weekly dates.
    let summary = engine
        .run(&two_pixels(), &window("2024-01-01", "2024-03-04"))
        .await
        .unwrap();
    assert_eq!(summary.stats.processed_weeks, 10);
    assert_eq!(source.call_count(), 10);
    assert!(source.max_in_flight() <= 2);
    assert!(source.max_in_flight() >= 1);
}

#[tokio::test]
async fn test_max_tiles_limits_run() {
    let archive = archive();
    let source = Arc::new(ScriptedSource::default());
    let config = ReconcilerConfig {
        max_tiles: Some(1),
        ..Default::default()
    };
    let engine = reconciler(&archive, &source, config);

    let mut pixels = two_pixels();
    pixels.insert(tile("h19v04"), vec![PixelPos::new(10, 10)]);

    let summary = engine
        .run(&pixels, &window("2024-01-01", "2024-01-01"))
        .await
        .unwrap();
    assert_eq!(summary.tiles_processed, 1);
    assert!(source.calls().iter().all(|c| c.tile == tile("h18v04")));
}

#[tokio::test]
async fn test_fill_cache_uses_archived_pixels() {
    let archive = archive();
    for (tile_id, row, col) in [("h18v04", 5, 6), ("h19v05", 7, 8)] {
        archive
            .update_week(&PixelKey::new(tile(tile_id), row, col), date("2024-01-01"), 30, 0)
            .await
            .unwrap();
    }

    let source = Arc::new(ScriptedSource::default());
    let engine = reconciler(&archive, &source, ReconcilerConfig::default());
    let summary = engine
        .run_fill_cache(&window("2024-01-01", "2024-01-08"))
        .await
        .unwrap();

    assert_eq!(summary.missing.tiles, 2);
    assert_eq!(summary.missing.missing_cells, 2);
    let calls = source.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].tile, tile("h18v04"));
    assert_eq!(calls[1].tile, tile("h19v05"));
    assert!(calls.iter().all(|c| c.date == date("2024-01-08")));
}

#[tokio::test]
async fn test_empty_inputs_are_rejected() {
    let archive = archive();
    let source = Arc::new(ScriptedSource::default());
    let engine = reconciler(&archive, &source, ReconcilerConfig::default());
    let span = window("2024-01-01", "2024-01-08");

    let none = engine.run(&BTreeMap::new(), &span).await;
    assert!(matches!(none, Err(ReconcileError::EmptyInput(_))));

    let hollow = BTreeMap::from([(tile("h18v04"), Vec::new())]);
    assert!(matches!(
        engine.run(&hollow, &span).await,
        Err(ReconcileError::EmptyInput(_))
    ));

    assert!(matches!(
        engine.run_fill_cache(&span).await,
        Err(ReconcileError::EmptyInput(_))
    ));
    assert_eq!(source.call_count(), 0);
}

/// Memory store that reports itself as not set up.
#[derive(Default)]
struct Uninitialized(MemoryBackend);

#[async_trait]
impl KvBackend for Uninitialized {
    async fn get(&self, key: &str) -> storage::Result<Option<String>> {
        self.0.get(key).await
    }
    async fn set(&self, key: &str, value: &str) -> storage::Result<()> {
        self.0.set(key, value).await
    }
    async fn delete(&self, key: &str) -> storage::Result<()> {
        self.0.delete(key).await
    }
    async fn scan_prefix(&self, prefix: &str) -> storage::Result<Vec<String>> {
        self.0.scan_prefix(prefix).await
    }
    async fn count(&self) -> storage::Result<u64> {
        self.0.count().await
    }
    async fn clear(&self) -> storage::Result<()> {
        self.0.clear().await
    }
    async fn size_bytes(&self) -> storage::Result<Option<u64>> {
        self.0.size_bytes().await
    }
    async fn purge_expired(&self) -> storage::Result<u64> {
        self.0.purge_expired().await
    }
    fn name(&self) -> &'static str {
        "uninitialized"
    }
    fn is_initialized(&self) -> bool {
        false
    }
}

#[tokio::test]
async fn test_uninitialized_store_is_fatal() {
    let archive = PixelArchive::new(Arc::new(Uninitialized::default()));
    let source = Arc::new(ScriptedSource::default());
    let engine = reconciler(&archive, &source, ReconcilerConfig::default());

    let result = engine
        .run(&two_pixels(), &window("2024-01-01", "2024-01-08"))
        .await;
    assert!(matches!(
        result,
        Err(ReconcileError::Storage(StorageError::NotInitialized(_)))
    ));
    assert_eq!(source.call_count(), 0);
}

#[derive(Clone, Copy, PartialEq)]
enum Fault {
    Read,
    Write,
}

/// Memory store that fails one kind of access for one key.
struct FaultyKey {
    inner: MemoryBackend,
    key: String,
    fault: Fault,
}

impl FaultyKey {
    fn new(key: &str, fault: Fault) -> Self {
        Self {
            inner: MemoryBackend::default(),
            key: key.to_string(),
            fault,
        }
    }

    fn fails(&self, key: &str, fault: Fault) -> bool {
        self.fault == fault && key == self.key
    }
}

#[async_trait]
impl KvBackend for FaultyKey {
    async fn get(&self, key: &str) -> storage::Result<Option<String>> {
        if self.fails(key, Fault::Read) {
            return Err(StorageError::cache("connection reset"));
        }
        self.inner.get(key).await
    }
    async fn set(&self, key: &str, value: &str) -> storage::Result<()> {
        if self.fails(key, Fault::Write) {
            return Err(StorageError::cache("disk full"));
        }
        self.inner.set(key, value).await
    }
    async fn delete(&self, key: &str) -> storage::Result<()> {
        self.inner.delete(key).await
    }
    async fn scan_prefix(&self, prefix: &str) -> storage::Result<Vec<String>> {
        self.inner.scan_prefix(prefix).await
    }
    async fn count(&self) -> storage::Result<u64> {
        self.inner.count().await
    }
    async fn clear(&self) -> storage::Result<()> {
        self.inner.clear().await
    }
    async fn size_bytes(&self) -> storage::Result<Option<u64>> {
        self.inner.size_bytes().await
    }
    async fn purge_expired(&self) -> storage::Result<u64> {
        self.inner.purge_expired().await
    }
    fn name(&self) -> &'static str {
        "faulty"
    }
}

#[tokio::test]
async fn test_failed_save_does_not_block_other_pixels() {
    let archive = PixelArchive::new(Arc::new(FaultyKey::new(
        "snow_cover:h18v04:1500:1001",
        Fault::Write,
    )));
    let source = Arc::new(ScriptedSource::default());
    let engine = reconciler(&archive, &source, ReconcilerConfig::default());

    let summary = engine
        .run(&two_pixels(), &window("2024-01-01", "2024-01-08"))
        .await
        .unwrap();
    assert_eq!(summary.stats.failed_saves, 1);
    assert_eq!(summary.stats.pixels_updated, 1);
    assert_eq!(summary.stats.errors, 0);
    assert!(!summary.is_success());
    assert!(!week(&archive, "h18v04", PixelPos::new(1500, 1000), "2024-01-08")
        .await
        .is_empty());
}

#[tokio::test]
async fn test_unreadable_pixel_does_not_block_other_pixels() {
    let archive = PixelArchive::new(Arc::new(FaultyKey::new(
        "snow_cover:h18v04:1500:1001",
        Fault::Read,
    )));
    let source = Arc::new(ScriptedSource::default());
    let engine = reconciler(&archive, &source, ReconcilerConfig::default());
    let span = window("2024-01-01", "2024-01-08");

    let missing = engine.missing_summary(&two_pixels(), &span).await;
    assert_eq!(missing.unreadable, 1);
    assert_eq!(missing.missing_cells, 2);

    let summary = engine.run(&two_pixels(), &span).await.unwrap();
    assert_eq!(summary.missing.unreadable, 1);
    assert_eq!(summary.stats.failed_loads, 1);
    assert_eq!(summary.stats.pixels_updated, 1);
    assert!(!summary.is_success());

    // Only the readable pixel was requested, once per week.
    let calls = source.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|c| c.pixels == vec![PixelPos::new(1500, 1000)]));
    assert!(!week(&archive, "h18v04", PixelPos::new(1500, 1000), "2024-01-08")
        .await
        .is_empty());
}

#[tokio::test]
async fn test_unreadable_pixel_fails_complete_run() {
    let archive = PixelArchive::new(Arc::new(FaultyKey::new(
        "snow_cover:h18v04:1500:1001",
        Fault::Read,
    )));
    let source = Arc::new(ScriptedSource::default());
    let engine = reconciler(&archive, &source, ReconcilerConfig::default());
    let span = window("2024-01-01", "2024-01-08");
    let only_readable = BTreeMap::from([(tile("h18v04"), vec![PixelPos::new(1500, 1000)])]);

    engine.run(&only_readable, &span).await.unwrap();
    let calls_before = source.call_count();

    let summary = engine.run(&two_pixels(), &span).await.unwrap();
    assert!(summary.missing.is_complete());
    assert_eq!(summary.stats.failed_loads, 1);
    assert!(!summary.is_success());
    assert_eq!(source.call_count(), calls_before);
}
