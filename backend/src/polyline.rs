//! Encoded polyline format used by OSRM for route geometries (precision 5).

use geo_types::Coord;

use crate::models::Coordinate;

const PRECISION: u32 = 5;

/// Decode a polyline string into coordinates.
///
/// Malformed input decodes to an empty path.
pub fn decode(encoded: &str) -> Vec<Coordinate> {
    match ::polyline::decode_polyline(encoded, PRECISION) {
        Ok(line) => line
            .0
            .into_iter()
            .map(|point| Coordinate::new(point.y, point.x))
            .collect(),
        Err(err) => {
            tracing::warn!("discarding undecodable route geometry: {err}");
            Vec::new()
        }
    }
}

/// Encode coordinates, rounding them to 5 decimal places.
pub fn encode(path: &[Coordinate]) -> Result<String, String> {
    let coords = path.iter().map(|c| Coord { x: c.lng, y: c.lat });
    ::polyline::encode_coordinates(coords, PRECISION).map_err(|err| err.to_string())
}
