//! The fixed global sinusoidal tile grid used by VIIRS/MODIS land products.
//!
//! The grid is 36 x 18 tiles of 10° (at the equator), each tile holding
//! 3000 x 3000 pixels of 375 m. Tile `h00v00` is the top-left corner of the
//! projected world; rows grow southwards and columns eastwards.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{BoundingBox, SnowError, SnowResult};

/// Pixel edge length in meters.
pub const PIXEL_SIZE: f64 = 375.0;
/// Tile edge length in meters (10° at the equator in sinusoidal projection).
pub const TILE_SIZE: f64 = 1_111_950.519667;
/// Pixels along one tile edge.
pub const PIXELS_PER_TILE: u16 = 3000;
/// Sphere radius of the sinusoidal grid, in meters.
pub const SPHERE_RADIUS: f64 = 6_371_007.181;
/// Full projected width of the grid.
pub const GLOBAL_WIDTH: f64 = 20_015_109.354 * 2.0;
/// Full projected height of the grid.
pub const GLOBAL_HEIGHT: f64 = 10_007_554.677 * 2.0;
/// Largest horizontal tile index.
pub const MAX_H: u8 = 35;
/// Largest vertical tile index.
pub const MAX_V: u8 = 17;

/// A tile of the sinusoidal grid, rendered as `hHHvVV`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TileId {
    h: u8,
    v: u8,
}

impl TileId {
    /// Create a tile id, rejecting indices outside the grid.
    pub fn new(h: u8, v: u8) -> SnowResult<Self> {
        if h > MAX_H || v > MAX_V {
            return Err(SnowError::TileOutOfRange { h, v });
        }
        Ok(Self { h, v })
    }

    /// Horizontal tile index (0-35).
    pub fn h(&self) -> u8 {
        self.h
    }

    /// Vertical tile index (0-17).
    pub fn v(&self) -> u8 {
        self.v
    }

    /// Projected x of the tile's left edge.
    pub fn left(&self) -> f64 {
        self.h as f64 * TILE_SIZE - GLOBAL_WIDTH / 2.0
    }

    /// Projected y of the tile's top edge.
    pub fn top(&self) -> f64 {
        GLOBAL_HEIGHT / 2.0 - self.v as f64 * TILE_SIZE
    }

    /// Center of a pixel of this tile in projected meters.
    pub fn pixel_center(&self, pos: PixelPos) -> (f64, f64) {
        (
            self.left() + (pos.col as f64 + 0.5) * PIXEL_SIZE,
            self.top() - (pos.row as f64 + 0.5) * PIXEL_SIZE,
        )
    }

    /// Footprint of a pixel of this tile in projected meters.
    pub fn pixel_bounds(&self, pos: PixelPos) -> BoundingBox {
        let (cx, cy) = self.pixel_center(pos);
        let half = PIXEL_SIZE / 2.0;
        BoundingBox::new(cx - half, cy - half, cx + half, cy + half)
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h{:02}v{:02}", self.h, self.v)
    }
}

impl FromStr for TileId {
    type Err = SnowError;

    fn from_str(s: &str) -> SnowResult<Self> {
        let invalid = || SnowError::InvalidTileId(s.to_string());

        if s.len() != 6 || !s.is_ascii() {
            return Err(invalid());
        }
        let (h_part, v_part) = s.split_at(3);
        let h = h_part
            .strip_prefix('h')
            .filter(|d| all_digits(d))
            .and_then(|d| d.parse::<u8>().ok())
            .ok_or_else(invalid)?;
        let v = v_part
            .strip_prefix('v')
            .filter(|d| all_digits(d))
            .and_then(|d| d.parse::<u8>().ok())
            .ok_or_else(invalid)?;

        Self::new(h, v)
    }
}

impl TryFrom<String> for TileId {
    type Error = SnowError;

    fn try_from(value: String) -> SnowResult<Self> {
        value.parse()
    }
}

impl From<TileId> for String {
    fn from(tile: TileId) -> Self {
        tile.to_string()
    }
}

/// Row/column of a pixel inside its tile, each in [0, 2999].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PixelPos {
    pub row: u16,
    pub col: u16,
}

impl PixelPos {
    pub fn new(row: u16, col: u16) -> Self {
        Self { row, col }
    }
}

/// Fully qualified pixel address: the cache key of the pixel archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PixelKey {
    pub tile: TileId,
    pub pos: PixelPos,
}

impl PixelKey {
    pub fn new(tile: TileId, row: u16, col: u16) -> Self {
        Self {
            tile,
            pos: PixelPos::new(row, col),
        }
    }

    pub fn row(&self) -> u16 {
        self.pos.row
    }

    pub fn col(&self) -> u16 {
        self.pos.col
    }
}

impl fmt::Display for PixelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.tile, self.pos.row, self.pos.col)
    }
}

impl FromStr for PixelKey {
    type Err = SnowError;

    /// Parse `hHHvVV:row:col`.
    fn from_str(s: &str) -> SnowResult<Self> {
        let invalid = || SnowError::InvalidPixelKey(s.to_string());

        let mut parts = s.split(':');
        let (Some(tile), Some(row), Some(col), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };

        // Only the canonical form, so keys round-trip through Display.
        let canonical = |d: &str| all_digits(d) && (d.len() == 1 || !d.starts_with('0'));
        if !canonical(row) || !canonical(col) {
            return Err(invalid());
        }

        let tile: TileId = tile.parse()?;
        let row: u16 = row.parse().map_err(|_| invalid())?;
        let col: u16 = col.parse().map_err(|_| invalid())?;
        if row >= PIXELS_PER_TILE || col >= PIXELS_PER_TILE {
            return Err(invalid());
        }

        Ok(Self::new(tile, row, col))
    }
}

fn all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Resolve a projected point to the grid pixel containing it.
///
/// Total: points outside the grid are clamped onto the nearest edge tile and
/// edge pixel rather than rejected.
pub fn point_to_cell(x: f64, y: f64) -> PixelKey {
    let h = clamp_index((x + GLOBAL_WIDTH / 2.0) / TILE_SIZE, MAX_H as f64) as u8;
    let v = clamp_index((GLOBAL_HEIGHT / 2.0 - y) / TILE_SIZE, MAX_V as f64) as u8;
    let tile = TileId { h, v };

    let last_pixel = (PIXELS_PER_TILE - 1) as f64;
    let col = clamp_index((x - tile.left()) / PIXEL_SIZE, last_pixel) as u16;
    let row = clamp_index((tile.top() - y) / PIXEL_SIZE, last_pixel) as u16;

    PixelKey::new(tile, row, col)
}

/// Projected bounds of a tile: `min_x` = left, `max_y` = top.
pub fn tile_bounds(tile: TileId) -> BoundingBox {
    let left = tile.left();
    let top = tile.top();
    BoundingBox::new(left, top - TILE_SIZE, left + TILE_SIZE, top)
}

fn clamp_index(value: f64, max: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.floor().clamp(0.0, max)
}
