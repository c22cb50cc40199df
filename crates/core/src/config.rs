use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn default_batch_size() -> usize {
  100
}
fn default_commit_interval() -> f64 {
  5.0
}
fn default_poll_interval() -> f64 {
  1.0
}
fn default_true() -> bool {
  true
}
fn default_hourly_retention_days() -> i64 {
  30
}
fn default_daily_rollup_hour() -> u32 {
  0
}
fn default_daily_rollup_minute() -> u32 {
  5
}
fn default_location_refresh_interval_hours() -> u64 {
  1
}
fn default_locales() -> Vec<String> {
  vec!["en".to_string()]
}

/// Recognised options (SPEC_FULL §6) plus the paths needed to run a standalone binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  pub log_path: PathBuf,
  pub geoip_db_path: PathBuf,
  pub db_path: PathBuf,

  #[serde(default = "default_locales")]
  pub geoip_locales: Vec<String>,

  #[serde(default = "default_batch_size")]
  pub batch_size: usize,

  #[serde(default = "default_commit_interval")]
  pub commit_interval: f64,

  #[serde(default)]
  pub store_debug_lines: bool,

  #[serde(default)]
  pub skip_validation: bool,

  #[serde(default = "default_true")]
  pub send_logs: bool,

  #[serde(default = "default_poll_interval")]
  pub poll_interval: f64,

  #[serde(default = "default_hourly_retention_days")]
  pub hourly_retention_days: i64,

  #[serde(default = "default_daily_rollup_hour")]
  pub daily_rollup_hour: u32,

  #[serde(default = "default_daily_rollup_minute")]
  pub daily_rollup_minute: u32,

  #[serde(default = "default_location_refresh_interval_hours")]
  pub location_refresh_interval_hours: u64,

  #[serde(default)]
  pub hostname: String,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      log_path: PathBuf::new(),
      geoip_db_path: PathBuf::new(),
      db_path: PathBuf::new(),
      geoip_locales: default_locales(),
      batch_size: default_batch_size(),
      commit_interval: default_commit_interval(),
      store_debug_lines: false,
      skip_validation: false,
      send_logs: true,
      poll_interval: default_poll_interval(),
      hourly_retention_days: default_hourly_retention_days(),
      daily_rollup_hour: default_daily_rollup_hour(),
      daily_rollup_minute: default_daily_rollup_minute(),
      location_refresh_interval_hours: default_location_refresh_interval_hours(),
      hostname: String::new(),
    }
  }
}
