//! Generators for synthetic granule rasters and archive entries.

use serde_json::{json, Value};

/// Creates a row-major snow grid of `size` x `size` values.
///
/// Cell value is `(row * 7 + col * 3 + seed) % 101`, inside the valid NDSI
/// range so a reader never has to apply fill-value handling.
pub fn create_snow_grid(size: usize, seed: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity(size * size);
    for row in 0..size {
        for col in 0..size {
            data.push(((row as u32 * 7 + col as u32 * 3 + seed) % 101) as u8);
        }
    }
    data
}

/// Creates a row-major grid filled with one value.
pub fn create_constant_grid(size: usize, value: u8) -> Vec<u8> {
    vec![value; size * size]
}

/// Builds a serialized pixel-archive entry.
///
/// `years` is a list of `(year, cells)` where each cell is
/// `(week_index, value, cloud_persistence)`. Unlisted weeks are `[null, 0]`.
pub fn archive_entry(years: &[(i32, &[(usize, Option<i32>, u32)])]) -> Value {
    let records: Vec<Value> = years
        .iter()
        .map(|(year, cells)| {
            let mut data = vec![json!([null, 0]); 53];
            for &(week, value, cp) in cells.iter() {
                if week >= data.len() {
                    data.resize(week + 1, json!([null, 0]));
                }
                data[week] = json!([value, cp]);
            }
            json!({ "year": year, "data": data })
        })
        .collect();
    Value::Array(records)
}
