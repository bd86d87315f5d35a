//! Sinusoidal (Sanson-Flamsteed) projection on a sphere.
//!
//! Forward equations, with λ and φ in radians and λ measured from the
//! central meridian:
//!
//! ```text
//! x = R · λ · cos(φ)
//! y = R · φ
//! ```
//!
//! The grid projection uses a 0° central meridian and the sphere radius
//! 6 371 007.181 m; see [`Sinusoidal::grid`].

use std::f64::consts::PI;

use snow_common::grid::SPHERE_RADIUS;

/// Sinusoidal projection parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sinusoidal {
    /// Central meridian in radians
    pub lon0: f64,
    /// Sphere radius (meters)
    pub radius: f64,
}

impl Sinusoidal {
    /// Create a projection with the given central meridian (degrees) and radius.
    pub fn new(lon0_deg: f64, radius: f64) -> Self {
        Self {
            lon0: lon0_deg * PI / 180.0,
            radius,
        }
    }

    /// The projection of the global land tile grid.
    pub fn grid() -> Self {
        Self::new(0.0, SPHERE_RADIUS)
    }

    /// Convert geographic coordinates (degrees) to projected meters.
    ///
    /// Takes longitude first, like GeoJSON positions.
    pub fn forward(&self, lon_deg: f64, lat_deg: f64) -> (f64, f64) {
        let to_rad = PI / 180.0;
        let lat = lat_deg * to_rad;

        // Normalize longitude difference to [-π, π]
        let mut dlon = lon_deg * to_rad - self.lon0;
        if dlon.abs() > PI {
            dlon = (dlon + PI).rem_euclid(2.0 * PI) - PI;
        }

        (self.radius * dlon * lat.cos(), self.radius * lat)
    }

    /// Convert projected meters back to geographic coordinates (degrees).
    ///
    /// Returns `None` for points outside the projected outline of the sphere.
    pub fn inverse(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let to_deg = 180.0 / PI;
        let lat = y / self.radius;
        if lat.abs() > PI / 2.0 {
            return None;
        }

        let cos_lat = lat.cos();
        let dlon = if cos_lat.abs() < 1e-12 {
            0.0
        } else {
            x / (self.radius * cos_lat)
        };
        if dlon.abs() > PI + 1e-9 {
            return None;
        }

        Some(((dlon + self.lon0) * to_deg, lat * to_deg))
    }
}

impl Default for Sinusoidal {
    fn default() -> Self {
        Self::grid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snow_common::grid::{point_to_cell, GLOBAL_HEIGHT, GLOBAL_WIDTH};
    use test_utils::{assert_approx_eq, assert_coords_approx_eq};

    #[test]
    fn test_origin() {
        let proj = Sinusoidal::grid();
        let (x, y) = proj.forward(0.0, 0.0);
        assert_coords_approx_eq!((x, y), (0.0, 0.0), 1e-9);
    }

    #[test]
    fn test_extent_matches_grid() {
        let proj = Sinusoidal::grid();
        let (x, _) = proj.forward(180.0, 0.0);
        let (_, y) = proj.forward(0.0, 90.0);
        // The published grid extent is a few meters inside R·π and R·π/2
        assert_approx_eq!(x, GLOBAL_WIDTH / 2.0, 10.0);
        assert_approx_eq!(y, GLOBAL_HEIGHT / 2.0, 10.0);
    }

    #[test]
    fn test_meridians_converge() {
        let proj = Sinusoidal::grid();
        let (x_equator, _) = proj.forward(10.0, 0.0);
        let (x_60, _) = proj.forward(10.0, 60.0);
        assert_approx_eq!(x_60, x_equator * 0.5, 1e-6);
    }

    #[test]
    fn test_longitude_wraps() {
        let proj = Sinusoidal::grid();
        let (x1, y1) = proj.forward(-190.0, 45.0);
        let (x2, y2) = proj.forward(170.0, 45.0);
        assert_coords_approx_eq!((x1, y1), (x2, y2), 1e-6);

        let (x1, y1) = proj.forward(370.0, 45.0);
        let (x2, y2) = proj.forward(10.0, 45.0);
        assert_coords_approx_eq!((x1, y1), (x2, y2), 1e-6);

        // Far outside any valid range, but must still return.
        let (x, y) = proj.forward(1.0e20, 46.0);
        assert!(x.abs() <= GLOBAL_WIDTH / 2.0 + 10.0);
        assert!(y.is_finite());
    }

    #[test]
    fn test_round_trip() {
        let proj = Sinusoidal::grid();
        for &(lon, lat) in &[(7.25, 46.1), (-106.8, 39.6), (138.2, 36.7), (-70.3, -33.3)] {
            let (x, y) = proj.forward(lon, lat);
            let (lon2, lat2) = proj.inverse(x, y).unwrap();
            assert_coords_approx_eq!((lon2, lat2), (lon, lat), 1e-9);
        }
        assert!(proj.inverse(0.0, GLOBAL_HEIGHT).is_none());
    }

    #[test]
    fn test_alps_land_in_h18v04() {
        // Verbier, Switzerland
        let proj = Sinusoidal::grid();
        let (x, y) = proj.forward(7.228, 46.096);
        assert_eq!(point_to_cell(x, y).tile.to_string(), "h18v04");
    }
}
