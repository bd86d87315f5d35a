//! The reconciliation engine.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use snow_common::{codes, DateWindow, PixelKey, PixelPos, TileId, WeekObservation};
use storage::PixelArchive;
use tracing::{debug, error, info, instrument, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{ReconcileError, Result};
use crate::source::{SourceError, TileDataSource};
use crate::stats::{MissingSummary, ReconcileStats, RunSummary};

/// Concurrent (tile, date) fetches when nothing else is configured.
pub const DEFAULT_MAX_WORKERS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Upper bound on in-flight fetches for one tile.
    pub max_workers: usize,
    /// Only process the first N tiles (by tile id).
    pub max_tiles: Option<usize>,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            max_tiles: None,
        }
    }
}

impl ReconcilerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(ReconcileError::InvalidConfig(
                "max_workers must be at least 1".to_string(),
            ));
        }
        if self.max_tiles == Some(0) {
            return Err(ReconcileError::InvalidConfig(
                "max_tiles must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Brings the archive up to date over a date window.
///
/// Per tile: find the weeks each pixel still needs, fetch every needed
/// (tile, date) once with at most `max_workers` fetches in flight, then write
/// each pixel back with a single load and save.
pub struct Reconciler {
    archive: PixelArchive,
    source: Arc<dyn TileDataSource>,
    clock: Arc<dyn Clock>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        archive: PixelArchive,
        source: Arc<dyn TileDataSource>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            archive,
            source,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    /// Replace the clock used to age unavailable dates.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn archive(&self) -> &PixelArchive {
        &self.archive
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Count the outstanding (pixel, week) cells without fetching anything.
    ///
    /// Pixels whose entry cannot be read are counted as unreadable and left
    /// out of the totals.
    pub async fn missing_summary(
        &self,
        pixels_by_tile: &BTreeMap<TileId, Vec<PixelPos>>,
        window: &DateWindow,
    ) -> MissingSummary {
        let mut summary = MissingSummary {
            tiles: pixels_by_tile.len(),
            ..Default::default()
        };
        for (tile, pixels) in pixels_by_tile {
            summary += self.plan_tile(*tile, pixels, window).await.missing();
        }
        summary
    }

    /// Reconcile the given pixels over `window`.
    ///
    /// Only setup problems are returned as errors. Unreadable pixels, fetch
    /// failures and save failures end up in the summary's statistics.
    #[instrument(skip_all, fields(start = %window.start, end = %window.end, source = self.source.name()))]
    pub async fn run(
        &self,
        pixels_by_tile: &BTreeMap<TileId, Vec<PixelPos>>,
        window: &DateWindow,
    ) -> Result<RunSummary> {
        self.config.validate()?;
        self.archive.ensure_ready()?;

        let selected: BTreeMap<TileId, Vec<PixelPos>> = pixels_by_tile
            .iter()
            .filter(|(_, pixels)| !pixels.is_empty())
            .take(self.config.max_tiles.unwrap_or(usize::MAX))
            .map(|(tile, pixels)| (*tile, pixels.clone()))
            .collect();

        if selected.is_empty() {
            return Err(ReconcileError::EmptyInput(
                "no pixels to reconcile".to_string(),
            ));
        }
        if selected.len() < pixels_by_tile.len() {
            info!(
                selected = selected.len(),
                total = pixels_by_tile.len(),
                "Limiting run to a subset of tiles"
            );
        }

        // Gap detection happens once; the plans drive the fetch phase.
        let mut plans = Vec::with_capacity(selected.len());
        let mut missing = MissingSummary {
            tiles: selected.len(),
            ..Default::default()
        };
        for (tile, pixels) in &selected {
            let plan = self.plan_tile(*tile, pixels, window).await;
            missing += plan.missing();
            plans.push(plan);
        }
        info!(
            tiles = missing.tiles,
            pixels = missing.pixels,
            pixels_with_gaps = missing.pixels_with_gaps,
            missing_weeks = missing.missing_cells,
            unreadable = missing.unreadable,
            "Gap detection complete"
        );

        let mut summary = RunSummary {
            missing,
            ..Default::default()
        };

        if missing.is_complete() {
            summary.stats.failed_loads = missing.unreadable;
            if summary.is_success() {
                info!("Archive is complete for the window, nothing to fetch");
            } else {
                warn!(%summary, "Nothing to fetch, but some pixels could not be read");
            }
            self.log_archive_stats().await;
            return Ok(summary);
        }

        for plan in plans {
            summary.stats += self.execute(plan).await;
            summary.tiles_processed += 1;
        }

        if summary.is_success() {
            info!(%summary, "Reconciliation complete");
        } else {
            warn!(%summary, "Reconciliation finished with errors");
        }
        self.log_archive_stats().await;

        Ok(summary)
    }

    /// Reconcile every pixel already present in the archive.
    pub async fn run_fill_cache(&self, window: &DateWindow) -> Result<RunSummary> {
        self.archive.ensure_ready()?;

        let discovered = self.archive.discover_pixels().await?;
        if discovered.is_empty() {
            return Err(ReconcileError::EmptyInput(
                "archive holds no pixels to fill".to_string(),
            ));
        }

        let pixels: usize = discovered.values().map(Vec::len).sum();
        info!(tiles = discovered.len(), pixels, "Filling gaps of archived pixels");
        self.run(&discovered, window).await
    }

    /// Reconcile one tile. Never fails; problems are counted in the result.
    pub async fn process_tile(
        &self,
        tile: TileId,
        pixels: &[PixelPos],
        window: &DateWindow,
    ) -> ReconcileStats {
        let plan = self.plan_tile(tile, pixels, window).await;
        self.execute(plan).await
    }

    /// Fetch and merge the weeks a tile plan asks for.
    #[instrument(skip_all, fields(tile = %plan.tile, pixels = plan.pixels))]
    async fn execute(&self, plan: TilePlan) -> ReconcileStats {
        let TilePlan {
            tile,
            needs,
            unreadable,
            ..
        } = plan;
        let mut stats = ReconcileStats {
            failed_loads: unreadable,
            ..Default::default()
        };

        if needs.is_empty() {
            debug!("Tile is complete");
            return stats;
        }

        let requests: usize = needs.values().map(Vec::len).sum();
        info!(dates = needs.len(), cells = requests, "Fetching missing weeks");

        let results = self.fetch_dates(tile, needs).await;
        stats.processed_weeks = results.len();

        let mut by_pixel: BTreeMap<PixelPos, Vec<(NaiveDate, WeekObservation)>> = BTreeMap::new();
        for (date, observations) in results {
            for (pos, observation) in observations {
                if observation.is_error() {
                    stats.errors += 1;
                }
                by_pixel.entry(pos).or_default().push((date, observation));
            }
        }

        for (pos, mut updates) in by_pixel {
            updates.sort_by_key(|(date, _)| *date);
            let key = PixelKey::new(tile, pos.row, pos.col);
            match self.archive.apply_updates(&key, &updates).await {
                Ok(()) => {
                    stats.pixels_updated += 1;
                    stats.cells_written += updates.len();
                }
                Err(e) => {
                    warn!(pixel = %key, error = %e, "Failed to save pixel");
                    stats.failed_saves += 1;
                }
            }
        }

        info!(
            weeks = stats.processed_weeks,
            pixels_updated = stats.pixels_updated,
            errors = stats.errors,
            failed_saves = stats.failed_saves,
            failed_loads = stats.failed_loads,
            "Tile reconciled"
        );
        stats
    }

    /// Read every pixel of a tile once and collect the dates each still needs.
    async fn plan_tile(&self, tile: TileId, pixels: &[PixelPos], window: &DateWindow) -> TilePlan {
        let unique: BTreeSet<PixelPos> = pixels.iter().copied().collect();
        let mut plan = TilePlan {
            pixels: unique.len(),
            ..TilePlan::empty(tile)
        };

        for pos in unique {
            let key = PixelKey::new(tile, pos.row, pos.col);
            match self.archive.missing_weeks(&key, window).await {
                Ok(missing) => {
                    if !missing.is_empty() {
                        plan.pixels_with_gaps += 1;
                    }
                    for (date, _) in missing {
                        plan.needs.entry(date).or_default().push(pos);
                    }
                }
                Err(e) => {
                    warn!(pixel = %key, error = %e, "Failed to read pixel, skipping");
                    plan.unreadable += 1;
                }
            }
        }

        plan
    }

    /// Fetch every needed date, at most `max_workers` at a time, and return
    /// one observation per requested pixel for each date.
    async fn fetch_dates(
        &self,
        tile: TileId,
        needs: BTreeMap<NaiveDate, Vec<PixelPos>>,
    ) -> Vec<(NaiveDate, Vec<(PixelPos, WeekObservation)>)> {
        let today = self.clock.today();

        stream::iter(needs)
            .map(|(date, pixels)| {
                let source = Arc::clone(&self.source);
                async move {
                    let requested = pixels.clone();
                    let handle = tokio::spawn(fetch_date(source, tile, date, pixels));

                    let observations = match handle.await {
                        Ok(Ok(values)) => complete_results(values, &requested, tile, date),
                        Ok(Err(SourceError::Unavailable(reason))) => {
                            let code = codes::for_unavailable(date, today);
                            info!(tile = %tile, %date, code, reason = %reason, "Tile data unavailable");
                            fill(&requested, code)
                        }
                        Ok(Err(SourceError::Failed(reason))) => {
                            warn!(tile = %tile, %date, reason = %reason, "Tile processing failed");
                            fill(&requested, codes::OTHER)
                        }
                        Err(e) => {
                            error!(tile = %tile, %date, error = %e, "Fetch task aborted");
                            fill(&requested, codes::OTHER)
                        }
                    };
                    (date, observations)
                }
            })
            .buffer_unordered(self.config.max_workers)
            .collect()
            .await
    }

    async fn log_archive_stats(&self) {
        match self.archive.stats().await {
            Ok(stats) => info!(
                entries = stats.entry_count,
                tiles = stats.tile_count,
                "{}",
                stats
            ),
            Err(e) => warn!(error = %e, "Failed to read archive statistics"),
        }
    }
}

#[instrument(skip_all, fields(tile = %tile, date = %date, pixels = pixels.len()))]
async fn fetch_date(
    source: Arc<dyn TileDataSource>,
    tile: TileId,
    date: NaiveDate,
    pixels: Vec<PixelPos>,
) -> std::result::Result<HashMap<PixelPos, WeekObservation>, SourceError> {
    debug!("Fetching tile data");
    source.fetch(tile, date, &pixels).await
}

/// One observation per requested pixel; pixels the source left out get 401.
fn complete_results(
    mut values: HashMap<PixelPos, WeekObservation>,
    requested: &[PixelPos],
    tile: TileId,
    date: NaiveDate,
) -> Vec<(PixelPos, WeekObservation)> {
    let mut omitted = 0usize;
    let observations = requested
        .iter()
        .map(|pos| {
            let observation = values.remove(pos).unwrap_or_else(|| {
                omitted += 1;
                WeekObservation::new(codes::OTHER, 0)
            });
            (*pos, observation)
        })
        .collect();

    if omitted > 0 {
        warn!(tile = %tile, %date, omitted, "Source omitted requested pixels");
    }
    if !values.is_empty() {
        debug!(tile = %tile, %date, extra = values.len(), "Ignoring unrequested pixels");
    }
    observations
}

fn fill(pixels: &[PixelPos], code: i32) -> Vec<(PixelPos, WeekObservation)> {
    pixels
        .iter()
        .map(|pos| (*pos, WeekObservation::new(code, 0)))
        .collect()
}

/// What one tile still needs: date -> pixels missing that date.
#[derive(Debug)]
struct TilePlan {
    tile: TileId,
    pixels: usize,
    pixels_with_gaps: usize,
    unreadable: usize,
    needs: BTreeMap<NaiveDate, Vec<PixelPos>>,
}

impl TilePlan {
    fn empty(tile: TileId) -> Self {
        Self {
            tile,
            pixels: 0,
            pixels_with_gaps: 0,
            unreadable: 0,
            needs: BTreeMap::new(),
        }
    }

    /// Totals for the gap summary; `tiles` is left for the caller.
    fn missing(&self) -> MissingSummary {
        MissingSummary {
            tiles: 0,
            pixels: self.pixels,
            pixels_with_gaps: self.pixels_with_gaps,
            missing_cells: self.needs.values().map(Vec::len).sum(),
            unreadable: self.unreadable,
        }
    }
}
