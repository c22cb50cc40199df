use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Command line arguments for accesswatch's ingestion pipeline.
///
/// NOTE: options that require a restart to take effect belong here; everything else belongs in
/// the config file.
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct DefaultCommandLineArgs {
  /// Path to a JSON config file overriding the built-in defaults.
  #[arg(long, env)]
  pub config: Option<PathBuf>,

  /// Path to the SQLite database file. Overrides the config file.
  #[arg(long, env)]
  pub db_path: Option<PathBuf>,

  /// Path to the access log file to tail. Overrides the config file.
  #[arg(long, env)]
  pub log_path: Option<PathBuf>,

  /// Path to the MaxMind GeoIP city database. Overrides the config file.
  #[arg(long, env)]
  pub geoip_db_path: Option<PathBuf>,

  /// Enable verbose (dev-style) logging.
  #[arg(long)]
  pub dev: bool,

  #[command(subcommand)]
  pub cmd: Option<SubCommands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommands {
  /// Starts the ingestion pipeline (tailer, enricher, persister, scheduler).
  Run,
  /// Recomputes the daily rollup for a closed range of days.
  Backfill(BackfillArgs),
}

#[derive(Args, Clone, Debug)]
pub struct BackfillArgs {
  /// First day to roll up, inclusive (YYYY-MM-DD, UTC).
  #[arg(long)]
  pub from: chrono::NaiveDate,

  /// Last day to roll up, inclusive (YYYY-MM-DD, UTC).
  #[arg(long)]
  pub to: chrono::NaiveDate,
}
