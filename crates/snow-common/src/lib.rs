//! Common types and utilities shared across the snow-cover crates.

pub mod bbox;
pub mod error;
pub mod grid;
pub mod observation;
pub mod time;

pub use bbox::BoundingBox;
pub use error::{SnowError, SnowResult};
pub use grid::{point_to_cell, tile_bounds, PixelKey, PixelPos, TileId};
pub use observation::{codes, WeekObservation, YearRecord};
pub use time::{week_date, week_index, DateWindow};
