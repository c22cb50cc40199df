#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
  #[error("store error: {0}")]
  Store(#[from] accesswatch_store::Error),

  #[error("geoip error: {0}")]
  GeoIp(#[from] accesswatch_geoip::GeoIpError),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("log file not found after retrying: {0}")]
  LogFileMissing(std::path::PathBuf),

  #[error("store unreachable at startup: {0}")]
  StoreUnreachable(#[source] accesswatch_store::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
