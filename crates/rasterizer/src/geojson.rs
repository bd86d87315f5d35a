//! GeoJSON input types for ski-run footprints.
//!
//! Only the subset of RFC 7946 needed to read a `FeatureCollection` of
//! polygons and lines is modeled. Positions may carry a third (altitude)
//! ordinate, which is ignored.

use geo::{Coord, LineString, Polygon};
use serde::{Deserialize, Serialize};

use crate::error::{RasterError, Result};
use crate::rasterize::Footprint;

/// A GeoJSON position: `[longitude, latitude]` with an optional altitude.
pub type Position = Vec<f64>;

/// A GeoJSON FeatureCollection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureCollection {
    /// Type identifier (always "FeatureCollection").
    #[serde(rename = "type")]
    pub type_: String,

    /// Array of features.
    #[serde(default)]
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    /// Create a collection from a list of features.
    pub fn new(features: Vec<Feature>) -> Self {
        Self {
            type_: "FeatureCollection".to_string(),
            features,
        }
    }
}

/// A GeoJSON Feature.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Feature {
    /// Type identifier (always "Feature").
    #[serde(rename = "type")]
    pub type_: String,

    /// Optional feature identifier (string or number).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,

    /// The geometry; `null` geometries are allowed by GeoJSON.
    pub geometry: Option<Geometry>,

    /// Free-form properties.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<serde_json::Map<String, serde_json::Value>>,
}

impl Feature {
    /// Create a feature with the given geometry and no properties.
    pub fn new(geometry: Geometry) -> Self {
        Self {
            type_: "Feature".to_string(),
            id: None,
            geometry: Some(geometry),
            properties: None,
        }
    }

    /// Set the `name` property.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.properties
            .get_or_insert_with(serde_json::Map::new)
            .insert("name".to_string(), serde_json::Value::String(name.into()));
        self
    }

    /// Human-readable label used in logs: the `name` property, then the id.
    pub fn label(&self) -> Option<String> {
        let name = self
            .properties
            .as_ref()
            .and_then(|p| p.get("name"))
            .and_then(|v| v.as_str())
            .map(str::to_string);

        name.or_else(|| {
            self.id.as_ref().map(|id| match id {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
        })
    }
}

/// GeoJSON geometry types.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Geometry {
    Point {
        coordinates: Position,
    },
    MultiPoint {
        coordinates: Vec<Position>,
    },
    LineString {
        coordinates: Vec<Position>,
    },
    MultiLineString {
        coordinates: Vec<Vec<Position>>,
    },
    Polygon {
        coordinates: Vec<Vec<Position>>,
    },
    MultiPolygon {
        coordinates: Vec<Vec<Vec<Position>>>,
    },
    GeometryCollection {
        geometries: Vec<Geometry>,
    },
}

impl Geometry {
    /// Build a polygon geometry from a single exterior ring.
    pub fn polygon(exterior: Vec<[f64; 2]>) -> Self {
        Geometry::Polygon {
            coordinates: vec![exterior.into_iter().map(|p| p.to_vec()).collect()],
        }
    }

    /// Build a line string geometry.
    pub fn line_string(coordinates: Vec<[f64; 2]>) -> Self {
        Geometry::LineString {
            coordinates: coordinates.into_iter().map(|p| p.to_vec()).collect(),
        }
    }

    /// GeoJSON type name.
    pub fn type_name(&self) -> &'static str {
        match self {
            Geometry::Point { .. } => "Point",
            Geometry::MultiPoint { .. } => "MultiPoint",
            Geometry::LineString { .. } => "LineString",
            Geometry::MultiLineString { .. } => "MultiLineString",
            Geometry::Polygon { .. } => "Polygon",
            Geometry::MultiPolygon { .. } => "MultiPolygon",
            Geometry::GeometryCollection { .. } => "GeometryCollection",
        }
    }

    /// Split the geometry into rasterizable parts (lon/lat coordinates).
    ///
    /// Multi-part geometries yield one footprint per part. Point types are
    /// not ski-run footprints and are rejected.
    pub fn footprints(&self) -> Result<Vec<Footprint>> {
        match self {
            Geometry::LineString { coordinates } => Ok(vec![Footprint::Line(line(coordinates)?)]),
            Geometry::MultiLineString { coordinates } => coordinates
                .iter()
                .map(|part| line(part).map(Footprint::Line))
                .collect(),
            Geometry::Polygon { coordinates } => Ok(vec![Footprint::Area(polygon(coordinates)?)]),
            Geometry::MultiPolygon { coordinates } => coordinates
                .iter()
                .map(|part| polygon(part).map(Footprint::Area))
                .collect(),
            other => Err(RasterError::UnsupportedGeometry(other.type_name().to_string())),
        }
    }
}

fn coord(position: &Position) -> Result<Coord<f64>> {
    match position.as_slice() {
        [lon, lat, ..] if (-180.0..=180.0).contains(lon) && (-90.0..=90.0).contains(lat) => {
            Ok(Coord { x: *lon, y: *lat })
        }
        _ => Err(RasterError::InvalidGeometry(format!(
            "position {:?} is not a [lon, lat] pair within [-180, 180] x [-90, 90]",
            position
        ))),
    }
}

fn ring(positions: &[Position]) -> Result<LineString<f64>> {
    let coords = positions.iter().map(coord).collect::<Result<Vec<_>>>()?;
    if coords.is_empty() {
        return Err(RasterError::InvalidGeometry("empty coordinate list".to_string()));
    }
    Ok(LineString::new(coords))
}

fn line(positions: &[Position]) -> Result<LineString<f64>> {
    ring(positions)
}

fn polygon(rings: &[Vec<Position>]) -> Result<Polygon<f64>> {
    let (exterior, interiors) = rings
        .split_first()
        .ok_or_else(|| RasterError::InvalidGeometry("polygon without rings".to_string()))?;

    let interiors = interiors
        .iter()
        .map(|r| ring(r))
        .collect::<Result<Vec<_>>>()?;

    // Polygon::new closes open rings.
    Ok(Polygon::new(ring(exterior)?, interiors))
}
