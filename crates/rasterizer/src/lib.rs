//! Geometry-to-grid rasterization.
//!
//! Turns a GeoJSON feature collection of ski-run footprints (polygons and
//! lines, in longitude/latitude) into the deduplicated set of 375 m grid
//! pixels they touch, grouped by tile for the reconciler.

pub mod error;
pub mod extract;
pub mod geojson;
pub mod rasterize;

pub use error::{RasterError, Result};
pub use extract::{load_feature_collection, pixels_by_tile, ExtractionReport, FeatureSummary, PixelExtractor};
pub use geojson::{Feature, FeatureCollection, Geometry};
pub use rasterize::{Footprint, Rasterizer};
