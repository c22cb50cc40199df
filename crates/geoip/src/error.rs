#[derive(thiserror::Error, Debug)]
pub enum GeoIpError {
  #[error("geoip database error: {0}")]
  MaxMindDb(#[from] maxminddb::MaxMindDbError),
}
