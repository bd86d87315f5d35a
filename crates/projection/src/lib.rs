//! Coordinate reference system transformations.
//!
//! Implements the sinusoidal equal-area projection used by the VIIRS/MODIS
//! land tile grid, without external dependencies.

pub mod sinusoidal;

pub use sinusoidal::Sinusoidal;
