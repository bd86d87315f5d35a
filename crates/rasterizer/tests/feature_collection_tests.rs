//! End-to-end extraction over GeoJSON fixture files.

use projection::Sinusoidal;
use rasterizer::{load_feature_collection, PixelExtractor, RasterError};
use snow_common::point_to_cell;
use test_utils::{fixtures, temp_test_dir, write_fixture};

#[test]
fn test_verbier_runs_extract_into_one_tile() {
    let dir = temp_test_dir();
    let path = write_fixture(dir.path(), "runs.geojson", fixtures::geojson::VERBIER_RUNS);

    let collection = load_feature_collection(&path).unwrap();
    let report = PixelExtractor::default().extract(&collection);

    assert_eq!(report.features.len(), 3);
    assert_eq!(report.skipped, 0);
    assert!(report.features.iter().all(|f| f.pixel_count > 0));

    let by_tile = report.by_tile();
    assert_eq!(by_tile.len(), 1);
    let (tile, pixels) = by_tile.iter().next().unwrap();
    assert_eq!(tile.to_string(), fixtures::pixels::VERBIER_TILE);
    assert_eq!(pixels.len(), report.pixels.len());
}

#[test]
fn test_line_endpoints_are_covered() {
    let collection: rasterizer::FeatureCollection =
        serde_json::from_str(fixtures::geojson::VERBIER_RUNS).unwrap();
    let report = PixelExtractor::default().extract(&collection);

    let grid = Sinusoidal::grid();
    for (lon, lat) in [(7.2281, 46.0961), (7.2350, 46.1010), (7.2500, 46.0870)] {
        let (x, y) = grid.forward(lon, lat);
        let key = point_to_cell(x, y);
        assert!(report.pixels.contains(&key), "missing {key}");
    }
}

#[test]
fn test_unusable_features_are_skipped() {
    let collection: rasterizer::FeatureCollection =
        serde_json::from_str(fixtures::geojson::UNUSABLE).unwrap();
    let report = PixelExtractor::default().extract(&collection);

    assert!(report.pixels.is_empty());
    assert_eq!(report.skipped, 2);
}

#[test]
fn test_out_of_range_coordinates_are_skipped() {
    let json = r#"{
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature", "properties": {"name": "Runaway"},
             "geometry": {"type": "LineString", "coordinates": [[1e20, 46.0], [7.23, 46.1]]}},
            {"type": "Feature", "properties": {"name": "Savoleyres"},
             "geometry": {"type": "LineString", "coordinates": [[7.2281, 46.0961], [7.2350, 46.1010]]}}
        ]
    }"#;
    let collection: rasterizer::FeatureCollection = serde_json::from_str(json).unwrap();
    let report = PixelExtractor::default().extract(&collection);

    assert_eq!(report.skipped, 1);
    assert_eq!(report.features.len(), 1);
    assert!(!report.pixels.is_empty());
}

#[test]
fn test_empty_collection() {
    let collection: rasterizer::FeatureCollection =
        serde_json::from_str(fixtures::geojson::EMPTY).unwrap();
    let report = PixelExtractor::default().extract(&collection);
    assert!(report.pixels.is_empty());
    assert!(report.by_tile().is_empty());
}

#[test]
fn test_missing_file_is_read_error() {
    let dir = temp_test_dir();
    let result = load_feature_collection(dir.path().join("nope.geojson"));
    assert!(matches!(result, Err(RasterError::FileRead(_))));
}

#[test]
fn test_malformed_file_is_json_error() {
    let dir = temp_test_dir();
    let path = write_fixture(dir.path(), "bad.geojson", "{\"type\": \"FeatureCollection\", ");
    assert!(matches!(
        load_feature_collection(&path),
        Err(RasterError::InvalidJson(_))
    ));
}
