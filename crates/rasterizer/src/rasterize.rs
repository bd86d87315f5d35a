//! Footprint rasterization onto the 375 m sinusoidal grid.
//!
//! A footprint is projected into grid meters, its bounding box resolved to a
//! range of candidate tiles, and every candidate cell (padded by one pixel
//! around the box) tested for intersection with the projected shape.
//! Boundary contact counts as intersection.

use std::collections::BTreeSet;

use geo::{BoundingRect, Centroid, Coord, Intersects, LineString, MapCoords, Polygon, Rect};
use projection::Sinusoidal;
use snow_common::grid::{PIXELS_PER_TILE, PIXEL_SIZE};
use snow_common::{point_to_cell, tile_bounds, BoundingBox, PixelKey, PixelPos, TileId};
use tracing::debug;

use crate::error::Result;
use crate::geojson::Geometry;

/// One rasterizable part of a geometry.
#[derive(Debug, Clone, PartialEq)]
pub enum Footprint {
    Area(Polygon<f64>),
    Line(LineString<f64>),
}

impl Footprint {
    fn project(&self, projection: Sinusoidal) -> Footprint {
        let forward = move |c: Coord<f64>| {
            let (x, y) = projection.forward(c.x, c.y);
            Coord { x, y }
        };
        match self {
            Footprint::Area(p) => Footprint::Area(p.map_coords(forward)),
            Footprint::Line(l) => Footprint::Line(l.map_coords(forward)),
        }
    }

    fn bounding_box(&self) -> Option<BoundingBox> {
        let rect = match self {
            Footprint::Area(p) => p.bounding_rect(),
            Footprint::Line(l) => l.bounding_rect(),
        }?;
        Some(BoundingBox::new(
            rect.min().x,
            rect.min().y,
            rect.max().x,
            rect.max().y,
        ))
    }

    fn intersects_cell(&self, cell: &Polygon<f64>) -> bool {
        match self {
            Footprint::Area(p) => p.intersects(cell),
            Footprint::Line(l) => l.intersects(cell),
        }
    }

    /// Centroid, or the first vertex when the shape has no defined centroid.
    fn anchor(&self) -> Option<(f64, f64)> {
        let (centroid, first) = match self {
            Footprint::Area(p) => (p.centroid(), p.exterior().0.first().copied()),
            Footprint::Line(l) => (l.centroid(), l.0.first().copied()),
        };
        centroid
            .map(|pt| (pt.x(), pt.y()))
            .or_else(|| first.map(|c| (c.x, c.y)))
    }
}

/// Maps geographic footprints to grid pixels.
#[derive(Debug, Clone, Copy)]
pub struct Rasterizer {
    projection: Sinusoidal,
}

impl Default for Rasterizer {
    fn default() -> Self {
        Self::new(Sinusoidal::grid())
    }
}

impl Rasterizer {
    pub fn new(projection: Sinusoidal) -> Self {
        Self { projection }
    }

    /// Every pixel touched by a GeoJSON geometry.
    ///
    /// Multi-part geometries are rasterized part by part and the results
    /// unioned.
    pub fn rasterize(&self, geometry: &Geometry) -> Result<BTreeSet<PixelKey>> {
        let mut pixels = BTreeSet::new();
        for part in geometry.footprints()? {
            pixels.extend(self.rasterize_footprint(&part));
        }
        Ok(pixels)
    }

    /// Every pixel touched by one footprint given in longitude/latitude.
    ///
    /// Never empty for a footprint with at least one vertex: if no cell
    /// intersects (shapes far smaller than a pixel), the pixel containing
    /// the centroid is returned.
    pub fn rasterize_footprint(&self, footprint: &Footprint) -> BTreeSet<PixelKey> {
        let projected = footprint.project(self.projection);
        let Some(bbox) = projected.bounding_box() else {
            return BTreeSet::new();
        };

        let top_left = point_to_cell(bbox.min_x, bbox.max_y);
        let bottom_right = point_to_cell(bbox.max_x, bbox.min_y);

        let mut pixels = BTreeSet::new();
        for h in top_left.tile.h()..=bottom_right.tile.h() {
            for v in top_left.tile.v()..=bottom_right.tile.v() {
                let Ok(tile) = TileId::new(h, v) else {
                    continue;
                };
                for pos in candidate_pixels(tile, &bbox) {
                    if projected.intersects_cell(&cell_polygon(tile, pos)) {
                        pixels.insert(PixelKey { tile, pos });
                    }
                }
            }
        }

        if pixels.is_empty() {
            if let Some((x, y)) = projected.anchor() {
                let key = point_to_cell(x, y);
                debug!(pixel = %key, "No cell intersects footprint, using centroid pixel");
                pixels.insert(key);
            }
        }

        pixels
    }
}

/// Candidate pixels of `tile` for a projected bounding box, padded by one
/// pixel on each side and clamped to the tile.
fn candidate_pixels(tile: TileId, bbox: &BoundingBox) -> impl Iterator<Item = PixelPos> {
    let range = bbox.intersection(&tile_bounds(tile)).map(|overlap| {
        let left = tile.left();
        let top = tile.top();
        (
            pixel_index((overlap.min_x - left) / PIXEL_SIZE, -1),
            pixel_index((overlap.max_x - left) / PIXEL_SIZE, 1),
            pixel_index((top - overlap.max_y) / PIXEL_SIZE, -1),
            pixel_index((top - overlap.min_y) / PIXEL_SIZE, 1),
        )
    });

    range
        .into_iter()
        .flat_map(|(col_min, col_max, row_min, row_max)| {
            (row_min..=row_max)
                .flat_map(move |row| (col_min..=col_max).map(move |col| PixelPos::new(row, col)))
        })
}

fn pixel_index(offset: f64, pad: i64) -> u16 {
    let last = (PIXELS_PER_TILE - 1) as i64;
    (offset.floor() as i64 + pad).clamp(0, last) as u16
}

/// The 375 m cell of a pixel as a polygon in grid meters.
fn cell_polygon(tile: TileId, pos: PixelPos) -> Polygon<f64> {
    let b = tile.pixel_bounds(pos);
    Rect::new(
        Coord {
            x: b.min_x,
            y: b.min_y,
        },
        Coord {
            x: b.max_x,
            y: b.max_y,
        },
    )
    .to_polygon()
}
