//! Unique-pixel extraction for a whole feature collection.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use snow_common::{PixelKey, PixelPos, TileId};
use tracing::{debug, info, instrument, warn};

use crate::error::Result;
use crate::geojson::FeatureCollection;
use crate::rasterize::Rasterizer;

/// Read and parse a GeoJSON FeatureCollection from disk.
pub fn load_feature_collection(path: impl AsRef<Path>) -> Result<FeatureCollection> {
    let bytes = std::fs::read(path.as_ref())?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Group pixel keys by tile, pixels in row-major order.
pub fn pixels_by_tile<'a, I>(pixels: I) -> BTreeMap<TileId, Vec<PixelPos>>
where
    I: IntoIterator<Item = &'a PixelKey>,
{
    let mut by_tile: BTreeMap<TileId, BTreeSet<PixelPos>> = BTreeMap::new();
    for key in pixels {
        by_tile.entry(key.tile).or_default().insert(key.pos);
    }
    by_tile
        .into_iter()
        .map(|(tile, set)| (tile, set.into_iter().collect()))
        .collect()
}

/// Per-feature outcome of an extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSummary {
    pub index: usize,
    pub label: Option<String>,
    pub pixel_count: usize,
}

/// Result of rasterizing a feature collection.
#[derive(Debug, Clone, Default)]
pub struct ExtractionReport {
    /// Deduplicated pixels across all features.
    pub pixels: BTreeSet<PixelKey>,
    pub features: Vec<FeatureSummary>,
    /// Features without a usable geometry.
    pub skipped: usize,
}

impl ExtractionReport {
    pub fn by_tile(&self) -> BTreeMap<TileId, Vec<PixelPos>> {
        pixels_by_tile(&self.pixels)
    }

    pub fn tile_count(&self) -> usize {
        self.pixels
            .iter()
            .map(|k| k.tile)
            .collect::<BTreeSet<_>>()
            .len()
    }
}

/// Rasterizes every feature of a collection.
#[derive(Debug, Clone, Copy, Default)]
pub struct PixelExtractor {
    rasterizer: Rasterizer,
}

impl PixelExtractor {
    pub fn new(rasterizer: Rasterizer) -> Self {
        Self { rasterizer }
    }

    /// Rasterize each feature and union the results.
    ///
    /// Features with a null, point-like or malformed geometry are logged and
    /// skipped; they never fail the whole collection.
    #[instrument(skip(self, collection), fields(features = collection.features.len()))]
    pub fn extract(&self, collection: &FeatureCollection) -> ExtractionReport {
        let mut report = ExtractionReport::default();

        for (index, feature) in collection.features.iter().enumerate() {
            let label = feature.label();
            let Some(geometry) = feature.geometry.as_ref() else {
                warn!(index, label = ?label, "Feature has no geometry, skipping");
                report.skipped += 1;
                continue;
            };

            match self.rasterizer.rasterize(geometry) {
                Ok(pixels) => {
                    debug!(
                        index,
                        label = ?label,
                        geometry = geometry.type_name(),
                        pixels = pixels.len(),
                        "Rasterized feature"
                    );
                    report.features.push(FeatureSummary {
                        index,
                        label,
                        pixel_count: pixels.len(),
                    });
                    report.pixels.extend(pixels);
                }
                Err(e) => {
                    warn!(index, label = ?label, error = %e, "Skipping feature");
                    report.skipped += 1;
                }
            }
        }

        info!(
            unique_pixels = report.pixels.len(),
            tiles = report.tile_count(),
            skipped = report.skipped,
            "Extracted pixels from feature collection"
        );
        report
    }
}
