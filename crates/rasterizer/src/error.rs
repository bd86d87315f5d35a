//! Error types for footprint rasterization.

use thiserror::Error;

/// Errors that can occur while reading or rasterizing footprints.
#[derive(Error, Debug)]
pub enum RasterError {
    #[error("Failed to read feature file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Invalid GeoJSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Unsupported geometry type: {0}")]
    UnsupportedGeometry(String),

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),
}

/// Result type for rasterization operations.
pub type Result<T> = std::result::Result<T, RasterError>;
