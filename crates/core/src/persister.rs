use accesswatch_geoip::{GeoIpReader, GeoRecord, LocationCache};
use accesswatch_store::models::{NewAccessLog, NewAccessLogDebug, NewGeoEvent, NewGeoLocation};
use accesswatch_store::{queries, Connection};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::aggregator::HourTracker;
use crate::config::Config;
use crate::error::Result;
use crate::parser::ParsedRecord;

/// Batches parsed records and flushes them in one transaction on size or time threshold
/// (SPEC_FULL §4.5), merging the closing hour's `BatchMetrics` into `hourly_stats` in the same
/// commit (SPEC_FULL §4.6).
pub struct Persister {
  conn: Connection,
  geoip: Arc<GeoIpReader>,
  cache: LocationCache,
  config: Config,
  pending: Vec<PendingWrite>,
  last_commit: Instant,
  tracker: Option<HourTracker>,
}

struct PendingWrite {
  access_log: Option<NewAccessLog>,
  debug: Option<NewAccessLogDebug>,
  geo_event: Option<NewGeoEvent>,
}

impl Persister {
  pub fn new(conn: Connection, geoip: Arc<GeoIpReader>, config: Config) -> Self {
    Self {
      conn,
      geoip,
      cache: LocationCache::new(10_000),
      config,
      pending: Vec::new(),
      last_commit: Instant::now(),
      tracker: None,
    }
  }

  /// Resolve geo data, decide what rows to emit, and add the record to the pending batch. Does
  /// not touch the store until `maybe_commit` decides a flush is due.
  pub async fn accept(&mut self, record: ParsedRecord) -> Result<()> {
    let mut geo: Option<GeoRecord> = None;
    if let Some(ip) = record.ip {
      geo = self.geoip.resolve(ip)?;
    }

    if self.tracker.is_none() {
      self.tracker = Some(HourTracker::new(record.timestamp));
    }

    // Hour-boundary rule: commit-and-rebase before applying a record from a later hour.
    if self
      .tracker
      .as_ref()
      .map(|t| t.crosses_boundary(record.timestamp))
      .unwrap_or(false)
    {
      self.commit().await?;
      self.tracker = Some(HourTracker::new(record.timestamp));
    }

    let geo_eligible = record.ip.map(accesswatch_geoip::ip_class::is_routable).unwrap_or(false);
    let want_debug = self.config.store_debug_lines || record.malformed;
    let want_access_log = self.config.send_logs && record.access.is_some() && geo_eligible;

    let access_log = if want_access_log {
      let access = record.access.clone().expect("checked above");
      Some(NewAccessLog {
        timestamp: record.timestamp.timestamp(),
        ip_address: record.ip.map(|ip| ip.to_string()).unwrap_or_default(),
        remote_user: access.remote_user,
        method: access.method,
        url: access.url,
        http_version: access.http_version,
        status_code: access.status_code,
        bytes_sent: access.bytes_sent,
        referrer: access.referrer,
        user_agent: access.user_agent,
        request_time: access.request_time,
        connect_time: access.connect_time,
        host: access.host,
        country_code: geo.as_ref().and_then(|g| g.country_code.clone()),
        country_name: geo.as_ref().and_then(|g| g.country_name.clone()),
        city: geo.as_ref().and_then(|g| g.city.clone()),
      })
    } else {
      None
    };

    let debug = if want_debug {
      Some(NewAccessLogDebug {
        access_log_id: None,
        created: Utc::now().timestamp(),
        raw_line: record.raw_line.clone(),
        is_malformed: record.malformed,
        parse_error: record.parse_error.clone(),
      })
    } else {
      None
    };

    let geo_event = if let (Some(ip), Some(ref g)) = (record.ip, &geo) {
      Some(self.build_geo_event(ip.to_string(), g, record.timestamp.timestamp())?)
    } else {
      None
    };

    if let Some(tracker) = self.tracker.as_mut() {
      let metrics = tracker.metrics_mut();
      if let (Some(ip), Some(ref g)) = (record.ip, &geo) {
        metrics.record_geo_event(&ip.to_string(), g.country_code.as_deref());
      }
      if let Some(ref al) = access_log {
        metrics.record_access_log(al.status_code, al.bytes_sent, al.request_time);
      }
      if record.malformed {
        metrics.record_malformed();
      }
    }

    self.pending.push(PendingWrite {
      access_log,
      debug,
      geo_event,
    });

    self.maybe_commit().await
  }

  fn build_geo_event(&mut self, ip: String, geo: &GeoRecord, timestamp: i64) -> Result<NewGeoEvent> {
    let geohash = accesswatch_geoip::geohash::encode(geo.latitude, geo.longitude)
      .map_err(|e| accesswatch_store::Error::Other(Box::new(std::io::Error::other(e.to_string()))))?;

    let location_id = if let Some(id) = self.cache.get(&geohash) {
      id
    } else {
      let new_location = NewGeoLocation {
        latitude: geo.latitude,
        longitude: geo.longitude,
        geohash: geohash.clone(),
        country_code: geo.country_code.clone(),
        country_name: geo.country_name.clone(),
        state: geo.state.clone(),
        state_code: geo.state_code.clone(),
        city: geo.city.clone(),
        postal_code: geo.postal_code.clone(),
        timezone: geo.timezone.clone(),
      };
      let now = Utc::now().timestamp();
      let location = self
        .conn
        .call(move |c| queries::get_or_create_location(c, &new_location, now).map_err(Into::into))
        .await?;
      self.cache.insert(geohash, location.id);
      location.id
    };

    Ok(NewGeoEvent {
      timestamp,
      ip_address: ip,
      hostname: if self.config.hostname.is_empty() {
        None
      } else {
        Some(self.config.hostname.clone())
      },
      location_id,
    })
  }

  async fn maybe_commit(&mut self) -> Result<()> {
    let size_due = self.pending.len() >= self.config.batch_size;
    let time_due = self.last_commit.elapsed() >= Duration::from_secs_f64(self.config.commit_interval);

    if size_due || time_due {
      self.commit().await?;
    }
    Ok(())
  }

  /// Idle ticks don't add records but do force the time check (SPEC_FULL §4.5).
  pub async fn on_idle(&mut self) -> Result<()> {
    self.maybe_commit().await
  }

  /// Final commit on shutdown (SPEC_FULL §4.8): attempted even on cancellation.
  pub async fn flush(&mut self) -> Result<()> {
    self.commit().await
  }

  async fn commit(&mut self) -> Result<()> {
    if self.pending.is_empty() {
      self.last_commit = Instant::now();
      return Ok(());
    }

    let writes = std::mem::take(&mut self.pending);
    let hourly = self.tracker.as_mut().map(|t| t.close());

    let result = self
      .conn
      .with_transaction(move |txn| {
        for write in writes {
          let mut access_log_id = None;
          if let Some(ref log) = write.access_log {
            access_log_id = Some(queries::insert_access_log(txn, log)?);
          }
          if let Some(mut debug) = write.debug {
            debug.access_log_id = access_log_id;
            queries::insert_access_log_debug(txn, &debug)?;
          }
          if let Some(ref event) = write.geo_event {
            queries::insert_geo_event(txn, event)?;
          }
        }

        if let Some(metrics) = hourly {
          if !metrics.is_empty() {
            queries::upsert_hourly_stats(txn, &metrics.into_store_metrics())?;
          }
        }

        Ok(())
      })
      .await;

    self.last_commit = Instant::now();

    match result {
      Ok(()) => Ok(()),
      Err(err) => {
        log::error!("batch commit failed, dropping batch: {err}");
        Ok(())
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::parser::parse_access_line;
  use chrono::TimeZone;

  async fn test_store() -> Connection {
    Connection::open(accesswatch_store::connect_sqlite_in_memory).await.unwrap()
  }

  fn line_at(ip: &str, time: &str) -> String {
    format!(r#"{ip} - - [{time} +0000] "GET /index.html HTTP/1.1" 200 512 "-" "curl/8.0" 0.002 - example.com"#)
  }

  async fn access_log_count(conn: &Connection) -> i64 {
    conn
      .query_value::<i64>("SELECT COUNT(*) FROM access_logs", ())
      .await
      .unwrap()
      .unwrap_or(0)
  }

  async fn debug_count(conn: &Connection) -> i64 {
    conn
      .query_value::<i64>("SELECT COUNT(*) FROM access_log_debug", ())
      .await
      .unwrap()
      .unwrap_or(0)
  }

  #[tokio::test]
  async fn commits_once_the_configured_batch_size_is_reached() {
    let conn = test_store().await;
    let geoip = Arc::new(GeoIpReader::empty(vec!["en".to_string()]));
    let mut config = Config::default();
    config.batch_size = 3;
    config.commit_interval = 3600.0;
    let mut persister = Persister::new(conn.clone(), geoip, config);

    let record = parse_access_line(&line_at("8.8.8.8", "10/Oct/2023:13:55:36"));
    persister.accept(record.clone()).await.unwrap();
    persister.accept(record.clone()).await.unwrap();
    assert_eq!(access_log_count(&conn).await, 0, "below batch_size, nothing committed yet");

    persister.accept(record).await.unwrap();
    assert_eq!(access_log_count(&conn).await, 3, "batch_size reached, batch committed");
  }

  #[tokio::test]
  async fn a_record_from_a_later_hour_forces_a_commit_before_it_is_applied() {
    let conn = test_store().await;
    let geoip = Arc::new(GeoIpReader::empty(vec!["en".to_string()]));
    let mut config = Config::default();
    config.batch_size = 1_000;
    config.commit_interval = 3600.0;
    let mut persister = Persister::new(conn.clone(), geoip, config);

    persister
      .accept(parse_access_line(&line_at("8.8.8.8", "10/Oct/2023:10:00:00")))
      .await
      .unwrap();
    persister
      .accept(parse_access_line(&line_at("8.8.8.8", "10/Oct/2023:10:30:00")))
      .await
      .unwrap();
    assert_eq!(access_log_count(&conn).await, 0, "still within the first hour, nothing committed");

    persister
      .accept(parse_access_line(&line_at("8.8.8.8", "10/Oct/2023:11:00:00")))
      .await
      .unwrap();

    assert_eq!(access_log_count(&conn).await, 2, "crossing the hour boundary committed the prior hour's batch");

    let hour_10 = Utc.with_ymd_and_hms(2023, 10, 10, 10, 0, 0).unwrap().timestamp();
    let total: i64 = conn
      .query_value::<i64>("SELECT total_requests FROM hourly_stats WHERE hour = ?1", (hour_10,))
      .await
      .unwrap()
      .unwrap_or(0);
    assert_eq!(total, 2, "the closed hour's two requests were merged, the new hour not yet committed");
  }

  #[tokio::test]
  async fn malformed_line_creates_a_debug_row_without_an_access_log_row() {
    let conn = test_store().await;
    let geoip = Arc::new(GeoIpReader::empty(vec!["en".to_string()]));
    let mut config = Config::default();
    config.batch_size = 1;
    config.commit_interval = 3600.0;
    let mut persister = Persister::new(conn.clone(), geoip, config);

    persister.accept(parse_access_line("not a valid access log line")).await.unwrap();

    assert_eq!(access_log_count(&conn).await, 0);
    assert_eq!(debug_count(&conn).await, 1);
  }

  #[tokio::test]
  async fn loopback_ip_is_ineligible_for_geoip_and_produces_no_access_log_row() {
    let conn = test_store().await;
    let geoip = Arc::new(GeoIpReader::empty(vec!["en".to_string()]));
    let mut config = Config::default();
    config.batch_size = 1;
    config.commit_interval = 3600.0;
    let mut persister = Persister::new(conn.clone(), geoip, config);

    persister
      .accept(parse_access_line(&line_at("127.0.0.1", "10/Oct/2023:13:55:36")))
      .await
      .unwrap();

    assert_eq!(access_log_count(&conn).await, 0);
  }

  #[tokio::test]
  async fn flush_commits_a_partial_batch_below_threshold() {
    let conn = test_store().await;
    let geoip = Arc::new(GeoIpReader::empty(vec!["en".to_string()]));
    let mut config = Config::default();
    config.batch_size = 1_000;
    config.commit_interval = 3600.0;
    let mut persister = Persister::new(conn.clone(), geoip, config);

    persister
      .accept(parse_access_line(&line_at("8.8.8.8", "10/Oct/2023:13:55:36")))
      .await
      .unwrap();
    assert_eq!(access_log_count(&conn).await, 0);

    persister.flush().await.unwrap();
    assert_eq!(access_log_count(&conn).await, 1);
  }
}
