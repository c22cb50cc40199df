//! Hand-written SQL for the pieces of the pipeline that need more than a single
//! `INSERT`/`SELECT`: the location dedup upsert, the guarded hourly-stats merge (the fix for the
//! original divide-by-zero bug), the daily rollup, retention sweep, and the set-based last-hit
//! refresh.

use rusqlite::{params, OptionalExtension};

use crate::models::{
  DailyStats, Granularity, HourlyMetrics, HourlyStats, NewAccessLog, NewAccessLogDebug,
  NewGeoEvent, NewGeoLocation, GeoLocation, Summary, SummaryComparison, TimeSeries,
};

fn row_to_location(row: &rusqlite::Row) -> rusqlite::Result<GeoLocation> {
  Ok(GeoLocation {
    id: row.get(0)?,
    latitude: row.get(1)?,
    longitude: row.get(2)?,
    geohash: row.get(3)?,
    country_code: row.get(4)?,
    country_name: row.get(5)?,
    state: row.get(6)?,
    state_code: row.get(7)?,
    city: row.get(8)?,
    postal_code: row.get(9)?,
    timezone: row.get(10)?,
    last_hit: row.get(11)?,
    created: row.get(12)?,
  })
}

const LOCATION_COLUMNS: &str = "id, latitude, longitude, geohash, country_code, country_name, \
  state, state_code, city, postal_code, timezone, last_hit, created";

pub fn find_location_by_geohash(
  conn: &rusqlite::Connection,
  geohash: &str,
) -> rusqlite::Result<Option<GeoLocation>> {
  conn
    .query_row(
      &format!("SELECT {LOCATION_COLUMNS} FROM geo_locations WHERE geohash = ?1"),
      params![geohash],
      row_to_location,
    )
    .optional()
}

/// Insert a new location for `geohash`, or return the existing one (SPEC_FULL §4.4 step 3).
///
/// The `ON CONFLICT DO NOTHING` + re-read pair is what makes a racing insert from another
/// connection recoverable without surfacing a constraint-violation error to the caller.
pub fn get_or_create_location(
  conn: &rusqlite::Connection,
  new: &NewGeoLocation,
  now: i64,
) -> rusqlite::Result<GeoLocation> {
  conn.execute(
    "INSERT INTO geo_locations \
       (latitude, longitude, geohash, country_code, country_name, state, state_code, city, \
        postal_code, timezone, created) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11) \
     ON CONFLICT(geohash) DO NOTHING",
    params![
      new.latitude,
      new.longitude,
      new.geohash,
      new.country_code,
      new.country_name,
      new.state,
      new.state_code,
      new.city,
      new.postal_code,
      new.timezone,
      now,
    ],
  )?;

  find_location_by_geohash(conn, &new.geohash)?
    .ok_or_else(|| rusqlite::Error::QueryReturnedNoRows)
}

pub fn insert_geo_event(conn: &rusqlite::Connection, event: &NewGeoEvent) -> rusqlite::Result<i64> {
  conn.execute(
    "INSERT INTO geo_events (timestamp, ip_address, hostname, location_id) VALUES (?1, ?2, ?3, ?4)",
    params![event.timestamp, event.ip_address, event.hostname, event.location_id],
  )?;
  Ok(conn.last_insert_rowid())
}

pub fn insert_access_log(
  conn: &rusqlite::Connection,
  log: &NewAccessLog,
) -> rusqlite::Result<i64> {
  conn.execute(
    "INSERT INTO access_logs \
       (timestamp, ip_address, remote_user, method, url, http_version, status_code, \
        bytes_sent, referrer, user_agent, request_time, connect_time, host, \
        country_code, country_name, city) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
    params![
      log.timestamp,
      log.ip_address,
      log.remote_user,
      log.method,
      log.url,
      log.http_version,
      log.status_code,
      log.bytes_sent,
      log.referrer,
      log.user_agent,
      log.request_time,
      log.connect_time,
      log.host,
      log.country_code,
      log.country_name,
      log.city,
    ],
  )?;
  Ok(conn.last_insert_rowid())
}

pub fn insert_access_log_debug(
  conn: &rusqlite::Connection,
  debug: &NewAccessLogDebug,
) -> rusqlite::Result<i64> {
  conn.execute(
    "INSERT INTO access_log_debug (access_log_id, created, raw_line, is_malformed, parse_error) \
     VALUES (?1, ?2, ?3, ?4, ?5)",
    params![
      debug.access_log_id,
      debug.created,
      debug.raw_line,
      debug.is_malformed,
      debug.parse_error,
    ],
  )?;
  Ok(conn.last_insert_rowid())
}

/// Atomically merge `metrics` into the `hourly_stats` row for `metrics.hour` (SPEC_FULL §4.6).
///
/// `avg_request_time` uses `NULLIF`/`COALESCE` to guard the weighted-mean denominator — the
/// known divide-by-zero bug this replaces fires when a geo-only batch (no access-log rows) hits
/// an hour that has no prior requests either.
pub fn upsert_hourly_stats(
  conn: &rusqlite::Connection,
  metrics: &HourlyMetrics,
) -> rusqlite::Result<()> {
  conn.execute(
    "INSERT INTO hourly_stats \
       (hour, total_requests, total_geo_events, unique_ips, unique_countries, \
        total_bytes_sent, status_2xx, status_3xx, status_4xx, status_5xx, \
        avg_request_time, max_request_time, malformed_requests) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, \
       COALESCE(?11 / NULLIF(?2, 0), 0.0), ?12, ?13) \
     ON CONFLICT(hour) DO UPDATE SET \
       total_requests     = total_requests + excluded.total_requests, \
       total_geo_events   = total_geo_events + excluded.total_geo_events, \
       unique_ips         = unique_ips + excluded.unique_ips, \
       unique_countries   = unique_countries + excluded.unique_countries, \
       total_bytes_sent   = total_bytes_sent + excluded.total_bytes_sent, \
       status_2xx         = status_2xx + excluded.status_2xx, \
       status_3xx         = status_3xx + excluded.status_3xx, \
       status_4xx         = status_4xx + excluded.status_4xx, \
       status_5xx         = status_5xx + excluded.status_5xx, \
       avg_request_time   = COALESCE( \
                               (avg_request_time * hourly_stats.total_requests + ?11) \
                               / NULLIF(hourly_stats.total_requests + excluded.total_requests, 0), \
                               0.0), \
       max_request_time   = max(max_request_time, excluded.max_request_time), \
       malformed_requests = malformed_requests + excluded.malformed_requests",
    params![
      metrics.hour,
      metrics.total_requests,
      metrics.total_geo_events,
      metrics.unique_ips,
      metrics.unique_countries,
      metrics.total_bytes_sent,
      metrics.status_2xx,
      metrics.status_3xx,
      metrics.status_4xx,
      metrics.status_5xx,
      metrics.total_request_time,
      metrics.max_request_time,
      metrics.malformed_requests,
    ],
  )?;
  Ok(())
}

fn row_to_hourly(row: &rusqlite::Row) -> rusqlite::Result<HourlyStats> {
  Ok(HourlyStats {
    hour: row.get(0)?,
    total_requests: row.get(1)?,
    total_geo_events: row.get(2)?,
    unique_ips: row.get(3)?,
    unique_countries: row.get(4)?,
    total_bytes_sent: row.get(5)?,
    status_2xx: row.get(6)?,
    status_3xx: row.get(7)?,
    status_4xx: row.get(8)?,
    status_5xx: row.get(9)?,
    avg_request_time: row.get(10)?,
    max_request_time: row.get(11)?,
    malformed_requests: row.get(12)?,
  })
}

const HOURLY_COLUMNS: &str = "hour, total_requests, total_geo_events, unique_ips, \
  unique_countries, total_bytes_sent, status_2xx, status_3xx, status_4xx, status_5xx, \
  avg_request_time, max_request_time, malformed_requests";

pub fn hourly_stats_for_day(
  conn: &rusqlite::Connection,
  day_start: i64,
  day_end: i64,
) -> rusqlite::Result<Vec<HourlyStats>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {HOURLY_COLUMNS} FROM hourly_stats WHERE hour >= ?1 AND hour < ?2 ORDER BY hour"
  ))?;
  let rows = stmt.query_map(params![day_start, day_end], row_to_hourly)?;
  rows.collect()
}

/// Fold the day's hourly rows into `daily_stats`. Returns `None` (and writes nothing) when the
/// day has no hourly rows or zero total requests (SPEC_FULL §4.7, boundary: empty day).
pub fn compute_daily_rollup(
  conn: &rusqlite::Connection,
  day_start: i64,
  day_end: i64,
) -> rusqlite::Result<Option<DailyStats>> {
  let hours = hourly_stats_for_day(conn, day_start, day_end)?;
  if hours.is_empty() {
    return Ok(None);
  }

  let total_requests: i64 = hours.iter().map(|h| h.total_requests).sum();
  if total_requests == 0 {
    return Ok(None);
  }

  let mut daily = DailyStats {
    date: day_start,
    total_requests,
    total_geo_events: hours.iter().map(|h| h.total_geo_events).sum(),
    unique_ips: hours.iter().map(|h| h.unique_ips).sum(),
    unique_countries: hours.iter().map(|h| h.unique_countries).max().unwrap_or(0),
    total_bytes_sent: hours.iter().map(|h| h.total_bytes_sent).sum(),
    status_2xx: hours.iter().map(|h| h.status_2xx).sum(),
    status_3xx: hours.iter().map(|h| h.status_3xx).sum(),
    status_4xx: hours.iter().map(|h| h.status_4xx).sum(),
    status_5xx: hours.iter().map(|h| h.status_5xx).sum(),
    avg_request_time: hours.iter().map(|h| h.avg_request_time).sum::<f64>() / hours.len() as f64,
    max_request_time: hours.iter().fold(0.0_f64, |acc, h| acc.max(h.max_request_time)),
    malformed_requests: hours.iter().map(|h| h.malformed_requests).sum(),
    peak_hour: None,
    peak_hour_requests: None,
  };

  if let Some(peak) = hours.iter().max_by_key(|h| h.total_requests) {
    daily.peak_hour = Some(peak.hour);
    daily.peak_hour_requests = Some(peak.total_requests);
  }

  conn.execute(
    "INSERT INTO daily_stats \
       (date, total_requests, total_geo_events, unique_ips, unique_countries, \
        total_bytes_sent, status_2xx, status_3xx, status_4xx, status_5xx, \
        avg_request_time, max_request_time, malformed_requests, peak_hour, peak_hour_requests) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15) \
     ON CONFLICT(date) DO UPDATE SET \
       total_requests      = excluded.total_requests, \
       total_geo_events    = excluded.total_geo_events, \
       unique_ips          = excluded.unique_ips, \
       unique_countries    = excluded.unique_countries, \
       total_bytes_sent    = excluded.total_bytes_sent, \
       status_2xx          = excluded.status_2xx, \
       status_3xx          = excluded.status_3xx, \
       status_4xx          = excluded.status_4xx, \
       status_5xx          = excluded.status_5xx, \
       avg_request_time    = excluded.avg_request_time, \
       max_request_time    = excluded.max_request_time, \
       malformed_requests  = excluded.malformed_requests, \
       peak_hour           = excluded.peak_hour, \
       peak_hour_requests  = excluded.peak_hour_requests",
    params![
      daily.date,
      daily.total_requests,
      daily.total_geo_events,
      daily.unique_ips,
      daily.unique_countries,
      daily.total_bytes_sent,
      daily.status_2xx,
      daily.status_3xx,
      daily.status_4xx,
      daily.status_5xx,
      daily.avg_request_time,
      daily.max_request_time,
      daily.malformed_requests,
      daily.peak_hour,
      daily.peak_hour_requests,
    ],
  )?;

  Ok(Some(daily))
}

/// Delete hourly rows strictly older than `cutoff` (SPEC_FULL §4.7 retention sweep).
pub fn delete_hourly_stats_before(conn: &rusqlite::Connection, cutoff: i64) -> rusqlite::Result<usize> {
  conn.execute("DELETE FROM hourly_stats WHERE hour < ?1", params![cutoff])
}

/// One set-based statement: advance every location's `last_hit` to the max timestamp of the
/// geo_events referencing it, only where that's an actual increase (SPEC_FULL §4.7). Never
/// iterate rows one at a time for this — that's the whole point of the rule.
pub fn refresh_location_last_hits(conn: &rusqlite::Connection) -> rusqlite::Result<usize> {
  conn.execute(
    "UPDATE geo_locations AS gl \
     SET last_hit = (SELECT MAX(ge.timestamp) FROM geo_events ge WHERE ge.location_id = gl.id) \
     WHERE gl.id IN ( \
       SELECT location_id FROM geo_events \
       GROUP BY location_id \
       HAVING MAX(timestamp) > COALESCE(( \
         SELECT last_hit FROM geo_locations WHERE id = location_id \
       ), -1) \
     )",
    params![],
  )
}

fn row_to_daily(row: &rusqlite::Row) -> rusqlite::Result<DailyStats> {
  Ok(DailyStats {
    date: row.get(0)?,
    total_requests: row.get(1)?,
    total_geo_events: row.get(2)?,
    unique_ips: row.get(3)?,
    unique_countries: row.get(4)?,
    total_bytes_sent: row.get(5)?,
    status_2xx: row.get(6)?,
    status_3xx: row.get(7)?,
    status_4xx: row.get(8)?,
    status_5xx: row.get(9)?,
    avg_request_time: row.get(10)?,
    max_request_time: row.get(11)?,
    malformed_requests: row.get(12)?,
    peak_hour: row.get(13)?,
    peak_hour_requests: row.get(14)?,
  })
}

const DAILY_COLUMNS: &str = "date, total_requests, total_geo_events, unique_ips, unique_countries, \
  total_bytes_sent, status_2xx, status_3xx, status_4xx, status_5xx, avg_request_time, \
  max_request_time, malformed_requests, peak_hour, peak_hour_requests";

pub fn daily_stats_between(
  conn: &rusqlite::Connection,
  start_date: i64,
  end_date: i64,
) -> rusqlite::Result<Vec<DailyStats>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {DAILY_COLUMNS} FROM daily_stats WHERE date >= ?1 AND date < ?2 ORDER BY date"
  ))?;
  let rows = stmt.query_map(params![start_date, end_date], row_to_daily)?;
  rows.collect()
}

fn fold_summary(hours: &[HourlyStats]) -> Summary {
  if hours.is_empty() {
    return Summary::default();
  }

  Summary {
    total_requests: hours.iter().map(|h| h.total_requests).sum(),
    total_geo_events: hours.iter().map(|h| h.total_geo_events).sum(),
    unique_ips: hours.iter().map(|h| h.unique_ips).sum(),
    unique_countries: hours.iter().map(|h| h.unique_countries).max().unwrap_or(0),
    total_bytes_sent: hours.iter().map(|h| h.total_bytes_sent).sum(),
    status_2xx: hours.iter().map(|h| h.status_2xx).sum(),
    status_3xx: hours.iter().map(|h| h.status_3xx).sum(),
    status_4xx: hours.iter().map(|h| h.status_4xx).sum(),
    status_5xx: hours.iter().map(|h| h.status_5xx).sum(),
    avg_request_time: hours.iter().map(|h| h.avg_request_time).sum::<f64>() / hours.len() as f64,
    max_request_time: hours.iter().fold(0.0_f64, |acc, h| acc.max(h.max_request_time)),
    malformed_requests: hours.iter().map(|h| h.malformed_requests).sum(),
  }
}

/// Aggregate `[start, end)` (half-open, hour-aligned) into one [`Summary`] (SPEC_FULL §6).
pub fn summary_between(conn: &rusqlite::Connection, start: i64, end: i64) -> rusqlite::Result<Summary> {
  let hours = hourly_stats_for_day(conn, start, end)?;
  Ok(fold_summary(&hours))
}

/// [`summary_between`] plus the same-length immediately-preceding period and the percent change
/// in `total_requests` between them (SPEC_FULL §6).
pub fn summary_with_previous(
  conn: &rusqlite::Connection,
  start: i64,
  end: i64,
) -> rusqlite::Result<SummaryComparison> {
  let current = summary_between(conn, start, end)?;

  let span = end - start;
  let previous_hours = hourly_stats_for_day(conn, start - span, start)?;
  let previous = if previous_hours.is_empty() {
    None
  } else {
    Some(fold_summary(&previous_hours))
  };

  let percent_change_total_requests = previous.as_ref().and_then(|p| {
    if p.total_requests == 0 {
      None
    } else {
      Some((current.total_requests - p.total_requests) as f64 / p.total_requests as f64 * 100.0)
    }
  });

  Ok(SummaryComparison {
    current,
    previous,
    percent_change_total_requests,
  })
}

/// Time series of pre-aggregated rows over `[start, end)` at the requested granularity
/// (SPEC_FULL §6).
pub fn time_series(
  conn: &rusqlite::Connection,
  start: i64,
  end: i64,
  granularity: Granularity,
) -> rusqlite::Result<TimeSeries> {
  Ok(match granularity {
    Granularity::Hourly => TimeSeries::Hourly(hourly_stats_for_day(conn, start, end)?),
    Granularity::Daily => TimeSeries::Daily(daily_stats_between(conn, start, end)?),
  })
}
