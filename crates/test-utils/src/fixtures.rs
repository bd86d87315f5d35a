//! Common test fixtures for snow-cover tests.
//!
//! Ski-run footprints, well-known pixel keys and reference dates used
//! across the workspace.

/// GeoJSON feature collections.
pub mod geojson {
    /// Three runs near Verbier (h18v04): a polygon, a line and a multi-line.
    pub const VERBIER_RUNS: &str = r#"{
  "type": "FeatureCollection",
  "features": [
    {
      "type": "Feature",
      "properties": {"name": "Col des Gentianes"},
      "geometry": {
        "type": "Polygon",
        "coordinates": [[
          [7.2800, 46.0850], [7.2870, 46.0850], [7.2870, 46.0900],
          [7.2800, 46.0900], [7.2800, 46.0850]
        ]]
      }
    },
    {
      "type": "Feature",
      "properties": {"name": "Piste 12"},
      "geometry": {
        "type": "LineString",
        "coordinates": [[7.2281, 46.0961, 2200.0], [7.2350, 46.1010, 1850.0]]
      }
    },
    {
      "type": "Feature",
      "id": "run-3",
      "geometry": {
        "type": "MultiLineString",
        "coordinates": [
          [[7.2400, 46.0800], [7.2450, 46.0830]],
          [[7.2450, 46.0830], [7.2500, 46.0870]]
        ]
      }
    }
  ]
}"#;

    /// A collection whose features are all unusable.
    pub const UNUSABLE: &str = r#"{
  "type": "FeatureCollection",
  "features": [
    {"type": "Feature", "properties": {"name": "lift"}, "geometry": {"type": "Point", "coordinates": [7.0, 46.0]}},
    {"type": "Feature", "properties": {}, "geometry": null}
  ]
}"#;

    /// An empty collection.
    pub const EMPTY: &str = r#"{"type": "FeatureCollection", "features": []}"#;
}

/// Well-known pixels.
pub mod pixels {
    /// Tile covering Verbier, Switzerland.
    pub const VERBIER_TILE: &str = "h18v04";

    /// Pixel with no prior data used in archive scenarios.
    pub const SCENARIO_KEY: &str = "h18v04:1500:1000";
}

/// Reference dates.
pub mod dates {
    /// Fixed "today" for aging decisions (ISO 8601).
    pub const TODAY: &str = "2024-06-15";

    /// Parse an ISO date, panicking on bad fixtures.
    pub fn date(s: &str) -> chrono::NaiveDate {
        chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("fixture date")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geojson_fixtures_parse() {
        for fixture in [geojson::VERBIER_RUNS, geojson::UNUSABLE, geojson::EMPTY] {
            let value: serde_json::Value = serde_json::from_str(fixture).unwrap();
            assert_eq!(value["type"], "FeatureCollection");
        }
    }

    #[test]
    fn test_reference_date() {
        assert_eq!(dates::date(dates::TODAY).to_string(), "2024-06-15");
    }
}
