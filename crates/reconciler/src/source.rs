//! The tile data source contract.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use snow_common::{PixelPos, TileId, WeekObservation};
use thiserror::Error;

/// Whole-request failure of a (tile, date) fetch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// No granule could be obtained for the tile and date (not published,
    /// not found, download failed). Recorded as 301 or 400 by date age.
    #[error("Tile data unavailable: {0}")]
    Unavailable(String),

    /// A granule was obtained but could not be processed. Recorded as 401.
    #[error("Tile processing failed: {0}")]
    Failed(String),
}

/// Provides raw snow-cover values for one tile and date.
#[async_trait]
pub trait TileDataSource: Send + Sync {
    /// Values for every requested pixel.
    ///
    /// Pixels the source could not read individually should be returned
    /// with the 401 code; any pixel missing from the map is recorded as 401
    /// by the engine.
    async fn fetch(
        &self,
        tile: TileId,
        date: NaiveDate,
        pixels: &[PixelPos],
    ) -> Result<HashMap<PixelPos, WeekObservation>, SourceError>;

    /// Short name for logs.
    fn name(&self) -> &str {
        "tile-source"
    }
}
