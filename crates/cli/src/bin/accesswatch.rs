use accesswatch::{scheduler, Config, Supervisor};
use accesswatch_geoip::GeoIpReader;
use accesswatch_store::Connection;
use clap::Parser;
use log::*;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

use accesswatch_cli::{BackfillArgs, DefaultCommandLineArgs, SubCommands};

fn init_logger(dev: bool) {
  const DEFAULT: &str = "info,accesswatch=debug";
  env_logger::init_from_env(if dev {
    env_logger::Env::new().default_filter_or(DEFAULT)
  } else {
    env_logger::Env::new().default_filter_or("info")
  });
}

fn load_config(args: &DefaultCommandLineArgs) -> anyhow::Result<Config> {
  let mut config = match &args.config {
    Some(path) => {
      let contents = std::fs::read_to_string(path)?;
      serde_json::from_str(&contents)?
    }
    None => Config::default(),
  };

  if let Some(ref db_path) = args.db_path {
    config.db_path = db_path.clone();
  }
  if let Some(ref log_path) = args.log_path {
    config.log_path = log_path.clone();
  }
  if let Some(ref geoip_db_path) = args.geoip_db_path {
    config.geoip_db_path = geoip_db_path.clone();
  }

  Ok(config)
}

async fn open_store(db_path: &PathBuf) -> anyhow::Result<Connection> {
  let path = db_path.clone();
  Ok(Connection::open(move || accesswatch_store::connect_sqlite(path)).await?)
}

fn open_geoip(geoip_db_path: &PathBuf, locales: Vec<String>) -> Arc<GeoIpReader> {
  match GeoIpReader::load(geoip_db_path, locales.clone()) {
    Ok(reader) => Arc::new(reader),
    Err(err) => {
      warn!("could not load GeoIP database at {geoip_db_path:?}: {err}; starting without geo enrichment");
      Arc::new(GeoIpReader::empty(locales))
    }
  }
}

async fn run(config: Config) -> anyhow::Result<()> {
  let conn = open_store(&config.db_path).await?;
  let geoip = open_geoip(&config.geoip_db_path, config.geoip_locales.clone());

  let mut supervisor = Supervisor::new(config, conn, geoip);

  if let Err(err) = supervisor.validate_startup().await {
    error!("startup validation failed, running in degraded mode: {err}");
    return Ok(());
  }

  supervisor.start().await?;

  tokio::signal::ctrl_c().await?;
  info!("received shutdown signal");
  supervisor.stop().await?;

  Ok(())
}

async fn run_backfill(config: Config, args: BackfillArgs) -> anyhow::Result<()> {
  let conn = open_store(&config.db_path).await?;
  let produced = scheduler::backfill(&conn, args.from, args.to).await?;
  println!("backfilled {produced} day(s) with data in [{}, {}]", args.from, args.to);
  Ok(())
}

async fn async_main() -> anyhow::Result<()> {
  let args = DefaultCommandLineArgs::parse();
  init_logger(args.dev);

  let config = load_config(&args)?;

  match args.cmd {
    Some(SubCommands::Run) | None => run(config).await,
    Some(SubCommands::Backfill(backfill_args)) => run_backfill(config, backfill_args).await,
  }
}

fn main() -> anyhow::Result<()> {
  let runtime = Rc::new(tokio::runtime::Builder::new_multi_thread().enable_all().build()?);
  runtime.block_on(async_main())
}
