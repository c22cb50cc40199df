/// 12-character geohash dedup key (SPEC_FULL §4.4). Two coordinate pairs with the same 12-char
/// geohash are treated as the same location.
pub const PRECISION: usize = 12;

pub fn encode(latitude: f64, longitude: f64) -> Result<String, ::geohash::GeohashError> {
  ::geohash::encode(::geohash::Coord { x: longitude, y: latitude }, PRECISION)
}
