//! Run statistics.

use std::fmt;
use std::ops::AddAssign;

use serde::Serialize;

/// Counters for one tile or a whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    /// Distinct (tile, date) fetches performed.
    pub processed_weeks: usize,
    /// Week cells written into the archive.
    pub cells_written: usize,
    /// Pixels whose entry was saved.
    pub pixels_updated: usize,
    /// Cells written with one of the error codes.
    pub errors: usize,
    /// Pixels whose save failed.
    pub failed_saves: usize,
    /// Pixels skipped because their entry could not be read.
    pub failed_loads: usize,
}

impl AddAssign for ReconcileStats {
    fn add_assign(&mut self, other: Self) {
        self.processed_weeks += other.processed_weeks;
        self.cells_written += other.cells_written;
        self.pixels_updated += other.pixels_updated;
        self.errors += other.errors;
        self.failed_saves += other.failed_saves;
        self.failed_loads += other.failed_loads;
    }
}

/// Outstanding work before a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MissingSummary {
    pub tiles: usize,
    pub pixels: usize,
    /// Pixels with at least one missing week.
    pub pixels_with_gaps: usize,
    /// Missing (pixel, week) cells.
    pub missing_cells: usize,
    /// Pixels whose entry could not be read.
    pub unreadable: usize,
}

impl AddAssign for MissingSummary {
    fn add_assign(&mut self, other: Self) {
        self.tiles += other.tiles;
        self.pixels += other.pixels;
        self.pixels_with_gaps += other.pixels_with_gaps;
        self.missing_cells += other.missing_cells;
        self.unreadable += other.unreadable;
    }
}

impl MissingSummary {
    pub fn is_complete(&self) -> bool {
        self.missing_cells == 0
    }
}

/// Outcome of a reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub missing: MissingSummary,
    pub tiles_processed: usize,
    pub stats: ReconcileStats,
}

impl RunSummary {
    /// True when nothing was recorded as an error and every pixel was
    /// read and saved.
    pub fn is_success(&self) -> bool {
        self.stats.errors == 0 && self.stats.failed_saves == 0 && self.stats.failed_loads == 0
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} tiles, {} weeks fetched, {} pixels updated, {} cells written, {} errors",
            self.tiles_processed,
            self.stats.processed_weeks,
            self.stats.pixels_updated,
            self.stats.cells_written,
            self.stats.errors
        )?;
        if self.stats.failed_saves > 0 || self.stats.failed_loads > 0 {
            write!(
                f,
                ", {} failed saves, {} failed loads",
                self.stats.failed_saves, self.stats.failed_loads
            )?;
        }
        Ok(())
    }
}
