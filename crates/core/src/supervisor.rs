use accesswatch_geoip::GeoIpReader;
use accesswatch_store::Connection;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::parser::{parse_access_line, parse_ip_only_line};
use crate::persister::Persister;
use crate::scheduler::{build_task_registry, TaskRegistry};
use crate::tailer::{Tailer, Tick};

const STARTUP_RETRY_TOTAL: Duration = Duration::from_secs(60);
const STARTUP_RETRY_POLL: Duration = Duration::from_millis(500);
const STOP_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Owns the whole pipeline's lifecycle: startup validation, the ingestion loop, the periodic
/// scheduler, and graceful shutdown (SPEC_FULL §4.8).
///
/// Grounded on `geometrikks/services/ingestion/service.py::LogIngestionService.start`/`stop`'s
/// timeout-then-force-cancel pattern and its `wait(timeout_seconds=...)`-decorated existence
/// checks, renamed here to plain retry loops gated by `DISABLE_WAIT`.
pub struct Supervisor {
  config: Config,
  conn: Connection,
  geoip: Arc<GeoIpReader>,
  stop: Arc<Notify>,
  ingestion: Option<JoinHandle<Result<()>>>,
  scheduler: Option<TaskRegistry>,
}

impl Supervisor {
  pub fn new(config: Config, conn: Connection, geoip: Arc<GeoIpReader>) -> Self {
    Self {
      config,
      conn,
      geoip,
      stop: Arc::new(Notify::new()),
      ingestion: None,
      scheduler: None,
    }
  }

  /// Retry-with-escape-hatch existence check used for both the log file and the GeoIP database
  /// at startup (SPEC_FULL §4.8). Set `DISABLE_WAIT` to check exactly once, for tests.
  async fn wait_for_path(path: &std::path::Path, total: Duration, poll: Duration) -> bool {
    if path.exists() {
      return true;
    }
    if std::env::var("DISABLE_WAIT").is_ok() {
      return false;
    }

    let deadline = tokio::time::Instant::now() + total;
    while tokio::time::Instant::now() < deadline {
      tokio::time::sleep(poll).await;
      if path.exists() {
        return true;
      }
    }
    false
  }

  /// Checks, in order: the log file exists (retried up to 60s), the GeoIP database is loaded,
  /// and the store answers a trivial query. Returns `StoreUnreachable`/`LogFileMissing` on
  /// failure; callers may choose to run in degraded mode rather than abort (SPEC_FULL §4.8).
  pub async fn validate_startup(&self) -> Result<()> {
    if !Self::wait_for_path(&self.config.log_path, STARTUP_RETRY_TOTAL, STARTUP_RETRY_POLL).await {
      return Err(PipelineError::LogFileMissing(self.config.log_path.clone()));
    }

    if !self.geoip.is_loaded() {
      log::warn!("geoip database not loaded at {:?}; geo enrichment disabled", self.config.geoip_db_path);
    }

    self
      .conn
      .query_value::<i64>("SELECT 1", ())
      .await
      .map_err(PipelineError::StoreUnreachable)?;

    Ok(())
  }

  /// Start the tailer/persister ingestion loop and the periodic scheduler. Returns once both are
  /// spawned; use `stop` to shut down gracefully.
  pub async fn start(&mut self) -> Result<()> {
    if self.ingestion.is_some() {
      log::warn!("supervisor already running");
      return Ok(());
    }

    let scheduler = build_task_registry(&self.config, self.conn.clone())
      .map_err(|err| PipelineError::Io(std::io::Error::other(err.to_string())))?;
    self.scheduler = Some(scheduler);

    let config = self.config.clone();
    let conn = self.conn.clone();
    let geoip = self.geoip.clone();
    let stop = self.stop.clone();

    self.ingestion = Some(tokio::spawn(async move { run_ingestion_loop(config, conn, geoip, stop).await }));

    log::info!(
      "started log ingestion (batch_size={}, commit_interval={}s)",
      self.config.batch_size,
      self.config.commit_interval
    );
    Ok(())
  }

  /// Signal the ingestion loop to stop, wait up to 10s for a graceful exit, then abort.
  pub async fn stop(&mut self) -> Result<()> {
    let Some(handle) = self.ingestion.take() else {
      return Ok(());
    };

    self.stop.notify_one();

    match tokio::time::timeout(STOP_GRACE_PERIOD, handle).await {
      Ok(Ok(result)) => {
        log::info!("stopped log ingestion service");
        result
      }
      Ok(Err(join_err)) => {
        log::error!("ingestion task panicked: {join_err}");
        Ok(())
      }
      Err(_) => {
        log::warn!("ingestion did not stop gracefully within {STOP_GRACE_PERIOD:?}, task left to finish aborting");
        Ok(())
      }
    }
  }
}

async fn run_ingestion_loop(
  config: Config,
  conn: Connection,
  geoip: Arc<GeoIpReader>,
  stop: Arc<Notify>,
) -> Result<()> {
  let mut tailer = Tailer::open(&config.log_path, false, Duration::from_secs_f64(config.poll_interval)).await?;
  let mut persister = Persister::new(conn, geoip, config.clone());

  loop {
    tokio::select! {
      _ = stop.notified() => {
        break;
      }
      tick = tailer.next_tick() => {
        match tick? {
          Tick::Line(line) => {
            let record = if config.send_logs {
              parse_access_line(&line)
            } else {
              parse_ip_only_line(&line)
            };
            persister.accept(record).await?;
          }
          Tick::Idle => {
            persister.on_idle().await?;
          }
        }
      }
    }
  }

  persister.flush().await?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  async fn empty_store() -> Connection {
    Connection::open(accesswatch_store::connect_sqlite_in_memory).await.unwrap()
  }

  #[tokio::test]
  async fn validate_startup_fails_fast_when_log_file_missing_and_wait_disabled() {
    std::env::set_var("DISABLE_WAIT", "1");
    let dir = tempfile::tempdir().unwrap();

    let mut config = Config::default();
    config.log_path = dir.path().join("does-not-exist.log");

    let conn = empty_store().await;
    let geoip = Arc::new(GeoIpReader::empty(vec!["en".to_string()]));
    let supervisor = Supervisor::new(config, conn, geoip);

    let err = supervisor.validate_startup().await.unwrap_err();
    assert!(matches!(err, PipelineError::LogFileMissing(_)));

    std::env::remove_var("DISABLE_WAIT");
  }

  #[tokio::test]
  async fn validate_startup_succeeds_when_log_present_and_store_reachable() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("access.log");
    std::fs::File::create(&log_path).unwrap();

    let mut config = Config::default();
    config.log_path = log_path;

    let conn = empty_store().await;
    let geoip = Arc::new(GeoIpReader::empty(vec!["en".to_string()]));
    let supervisor = Supervisor::new(config, conn, geoip);

    supervisor.validate_startup().await.unwrap();
  }

  #[tokio::test]
  async fn start_then_stop_processes_a_pending_line_and_exits_gracefully() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("access.log");
    {
      let mut file = std::fs::File::create(&log_path).unwrap();
      writeln!(
        file,
        r#"8.8.8.8 - - [10/Oct/2023:13:55:36 +0000] "GET / HTTP/1.1" 200 512 "-" "curl/8.0" 0.002 - example.com"#
      )
      .unwrap();
    }

    let mut config = Config::default();
    config.log_path = log_path;
    config.poll_interval = 0.05;
    config.commit_interval = 0.05;

    let conn = empty_store().await;
    let geoip = Arc::new(GeoIpReader::empty(vec!["en".to_string()]));
    let mut supervisor = Supervisor::new(config, conn.clone(), geoip);

    supervisor.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    supervisor.stop().await.unwrap();

    let count: Option<i64> = conn.query_value("SELECT COUNT(*) FROM access_logs", ()).await.unwrap();
    assert_eq!(count, Some(1));
  }
}
