//! Reconciliation of the pixel archive against a tile data source.
//!
//! For every tracked pixel the engine finds the weeks still missing from the
//! archive, fetches each missing (tile, date) once for all pixels that need
//! it, and merges the results back with one load and one save per pixel.

pub mod clock;
pub mod engine;
pub mod error;
pub mod source;
pub mod stats;

pub use clock::{Clock, FixedClock, SystemClock};
pub use engine::{Reconciler, ReconcilerConfig, DEFAULT_MAX_WORKERS};
pub use error::{ReconcileError, Result};
pub use source::{SourceError, TileDataSource};
pub use stats::{MissingSummary, ReconcileStats, RunSummary};
