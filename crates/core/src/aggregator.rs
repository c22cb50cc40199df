use accesswatch_store::models::HourlyMetrics;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

fn hour_bucket(ts: DateTime<Utc>) -> i64 {
  (ts.timestamp() / 3600) * 3600
}

/// In-batch accumulator for the UTC hour currently being filled (SPEC_FULL §4.6). Reset on every
/// commit; the hour-boundary rule lives in `Batch::accept`, not here.
#[derive(Debug, Default)]
pub struct BatchMetrics {
  pub hour: i64,
  total_requests: i64,
  total_geo_events: i64,
  total_bytes_sent: i64,
  status_2xx: i64,
  status_3xx: i64,
  status_4xx: i64,
  status_5xx: i64,
  total_request_time: f64,
  max_request_time: f64,
  malformed_requests: i64,
  seen_ips: HashSet<String>,
  seen_countries: HashSet<String>,
}

impl BatchMetrics {
  pub fn for_hour(hour: i64) -> Self {
    Self {
      hour,
      ..Default::default()
    }
  }

  pub fn record_geo_event(&mut self, ip: &str, country_code: Option<&str>) {
    self.total_geo_events += 1;
    self.seen_ips.insert(ip.to_string());
    if let Some(cc) = country_code {
      self.seen_countries.insert(cc.to_string());
    }
  }

  pub fn record_access_log(&mut self, status_code: i64, bytes_sent: i64, request_time: f64) {
    self.total_requests += 1;
    self.total_bytes_sent += bytes_sent;
    self.total_request_time += request_time;
    self.max_request_time = self.max_request_time.max(request_time);
    match status_code / 100 {
      2 => self.status_2xx += 1,
      3 => self.status_3xx += 1,
      4 => self.status_4xx += 1,
      5 => self.status_5xx += 1,
      _ => {}
    }
  }

  pub fn record_malformed(&mut self) {
    self.malformed_requests += 1;
  }

  pub fn is_empty(&self) -> bool {
    self.total_requests == 0 && self.total_geo_events == 0 && self.malformed_requests == 0
  }

  pub fn into_store_metrics(self) -> HourlyMetrics {
    HourlyMetrics {
      hour: self.hour,
      total_requests: self.total_requests,
      total_geo_events: self.total_geo_events,
      unique_ips: self.seen_ips.len() as i64,
      unique_countries: self.seen_countries.len() as i64,
      total_bytes_sent: self.total_bytes_sent,
      status_2xx: self.status_2xx,
      status_3xx: self.status_3xx,
      status_4xx: self.status_4xx,
      status_5xx: self.status_5xx,
      total_request_time: self.total_request_time,
      max_request_time: self.max_request_time,
      malformed_requests: self.malformed_requests,
    }
  }
}

/// Tracks the current in-batch hour and tells the persister when a record's timestamp crosses
/// into a later hour, so the caller can commit-and-rebase before applying it (SPEC_FULL §4.6).
pub struct HourTracker {
  current: BatchMetrics,
}

impl HourTracker {
  pub fn new(ts: DateTime<Utc>) -> Self {
    Self {
      current: BatchMetrics::for_hour(hour_bucket(ts)),
    }
  }

  pub fn hour_of(ts: DateTime<Utc>) -> i64 {
    hour_bucket(ts)
  }

  /// Does `ts` belong to a later hour than the batch currently tracks?
  pub fn crosses_boundary(&self, ts: DateTime<Utc>) -> bool {
    hour_bucket(ts) > self.current.hour
  }

  pub fn metrics_mut(&mut self) -> &mut BatchMetrics {
    &mut self.current
  }

  /// Close out the current hour and start a fresh one for `ts`. Returns the closed batch for the
  /// caller to merge into `hourly_stats` as part of the commit that's already in flight. Used only
  /// when the caller is about to rebase onto a genuinely later hour (SPEC_FULL §4.6).
  pub fn take(&mut self, ts: DateTime<Utc>) -> BatchMetrics {
    std::mem::replace(&mut self.current, BatchMetrics::for_hour(hour_bucket(ts)))
  }

  /// Close out the current hour for a plain size/time-triggered commit, where no boundary was
  /// crossed: the replacement batch stays on the *same* hour rather than rebasing to wall-clock
  /// time, which would otherwise desync the tracker from record timestamps (e.g. during backfill
  /// of historical logs, where "now" and the records' hour can differ arbitrarily).
  pub fn close(&mut self) -> BatchMetrics {
    let hour = self.current.hour;
    std::mem::replace(&mut self.current, BatchMetrics::for_hour(hour))
  }
}
