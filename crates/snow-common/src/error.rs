//! Error types for snow-cover services.

use thiserror::Error;

/// Result type alias using SnowError.
pub type SnowResult<T> = Result<T, SnowError>;

/// Primary error type for grid, key and date problems.
#[derive(Debug, Error)]
pub enum SnowError {
    #[error("Invalid tile identifier: {0}. Expected 'hHHvVV'")]
    InvalidTileId(String),

    #[error("Tile index out of range: h={h}, v={v}")]
    TileOutOfRange { h: u8, v: u8 },

    #[error("Invalid pixel key: {0}")]
    InvalidPixelKey(String),

    #[error("Invalid date window: {start} is after {end}")]
    InvalidDateWindow { start: String, end: String },

    #[error("Invalid year range: {0}")]
    InvalidYearRange(String),
}
