//! Reading pixel values out of downloaded VNP10A1F granules.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use snow_common::{codes, PixelPos, WeekObservation};
use thiserror::Error;

/// Gap-filled NDSI snow cover, stored raw (0-100 plus the product's flag values).
pub const SNOW_COVER_DATASET: &str =
    "HDFEOS/GRIDS/VIIRS_Grid_IMG_2D/Data Fields/CGF_NDSI_Snow_Cover";

/// Days since the last cloud-free observation of the pixel.
pub const CLOUD_PERSISTENCE_DATASET: &str =
    "HDFEOS/GRIDS/VIIRS_Grid_IMG_2D/Data Fields/Cloud_Persistence";

#[derive(Error, Debug)]
pub enum GranuleError {
    #[error("Failed to open granule: {0}")]
    Open(String),

    #[error("Missing dataset: {0}")]
    MissingDataset(String),

    #[error("Failed to read dataset: {0}")]
    Read(String),

    #[error("Invalid dataset shape: {0}")]
    Shape(String),
}

/// The two raster layers of a granule, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct GranuleGrid {
    width: usize,
    height: usize,
    snow_cover: Vec<u8>,
    cloud_persistence: Option<Vec<u8>>,
}

impl GranuleGrid {
    pub fn new(
        width: usize,
        height: usize,
        snow_cover: Vec<u8>,
        cloud_persistence: Option<Vec<u8>>,
    ) -> Result<Self, GranuleError> {
        let expected = width * height;
        if snow_cover.len() != expected {
            return Err(GranuleError::Shape(format!(
                "snow cover has {} values, expected {}x{}",
                snow_cover.len(),
                height,
                width
            )));
        }
        if let Some(cloud) = &cloud_persistence {
            if cloud.len() != expected {
                return Err(GranuleError::Shape(format!(
                    "cloud persistence has {} values, expected {}x{}",
                    cloud.len(),
                    height,
                    width
                )));
            }
        }

        Ok(Self {
            width,
            height,
            snow_cover,
            cloud_persistence,
        })
    }

    /// Observation for one pixel. Pixels outside the raster get 401.
    pub fn observation(&self, pos: PixelPos) -> WeekObservation {
        let (row, col) = (pos.row as usize, pos.col as usize);
        if row >= self.height || col >= self.width {
            return WeekObservation::new(codes::OTHER, 0);
        }

        let index = row * self.width + col;
        let cloud = self
            .cloud_persistence
            .as_ref()
            .map(|c| c[index] as u32)
            .unwrap_or(0);
        WeekObservation::new(self.snow_cover[index] as i32, cloud)
    }

    pub fn observations(&self, pixels: &[PixelPos]) -> HashMap<PixelPos, WeekObservation> {
        pixels
            .iter()
            .map(|pos| (*pos, self.observation(*pos)))
            .collect()
    }
}

/// Decodes a granule file. Called on a blocking thread.
pub trait GranuleReader: Send + Sync {
    fn read(&self, path: &Path) -> Result<GranuleGrid, GranuleError>;

    fn name(&self) -> &'static str;
}

/// HDF5 granules through libnetcdf.
#[cfg(feature = "hdf5")]
#[derive(Debug, Default, Clone, Copy)]
pub struct NetcdfReader;

#[cfg(feature = "hdf5")]
impl GranuleReader for NetcdfReader {
    fn read(&self, path: &Path) -> Result<GranuleGrid, GranuleError> {
        let file = netcdf::open(path)
            .map_err(|e| GranuleError::Open(format!("{}: {}", path.display(), e)))?;

        let snow = file
            .variable(SNOW_COVER_DATASET)
            .ok_or_else(|| GranuleError::MissingDataset(SNOW_COVER_DATASET.to_string()))?;

        let (height, width) = match snow.dimensions() {
            [rows, cols] => (rows.len(), cols.len()),
            dims => {
                return Err(GranuleError::Shape(format!(
                    "expected 2 dimensions, found {}",
                    dims.len()
                )))
            }
        };

        let snow_cover: Vec<u8> = snow
            .get_values(..)
            .map_err(|e| GranuleError::Read(format!("{}: {}", SNOW_COVER_DATASET, e)))?;

        // Older collections ship without the persistence layer.
        let cloud_persistence = match file.variable(CLOUD_PERSISTENCE_DATASET) {
            Some(var) => Some(var.get_values::<u8, _>(..).map_err(|e| {
                GranuleError::Read(format!("{}: {}", CLOUD_PERSISTENCE_DATASET, e))
            })?),
            None => None,
        };

        GranuleGrid::new(width, height, snow_cover, cloud_persistence)
    }

    fn name(&self) -> &'static str {
        "netcdf"
    }
}

/// The reader compiled into this binary, if any.
pub fn default_reader() -> Option<Arc<dyn GranuleReader>> {
    #[cfg(feature = "hdf5")]
    {
        Some(Arc::new(NetcdfReader))
    }
    #[cfg(not(feature = "hdf5"))]
    {
        None
    }
}
