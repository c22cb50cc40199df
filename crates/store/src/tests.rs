use crate::connection::Connection;
use crate::models::{
  Granularity, HourlyMetrics, NewAccessLog, NewAccessLogDebug, NewGeoEvent, NewGeoLocation,
  TimeSeries,
};
use crate::{extension, queries};

async fn open_test_db() -> Connection {
  Connection::open(extension::connect_sqlite_in_memory)
    .await
    .unwrap()
}

#[tokio::test]
async fn open_in_memory_test() {
  let conn = open_test_db().await;
  assert!(conn.close().await.is_ok());
}

#[tokio::test]
async fn location_get_or_create_is_idempotent_on_geohash() {
  let conn = open_test_db().await;

  let new = NewGeoLocation {
    latitude: 52.52,
    longitude: 13.405,
    geohash: "u33dbfcyegc0".to_string(),
    country_code: Some("DE".to_string()),
    country_name: Some("Germany".to_string()),
    state: None,
    state_code: None,
    city: Some("Berlin".to_string()),
    postal_code: None,
    timezone: Some("Europe/Berlin".to_string()),
  };

  let first = conn
    .call({
      let new = new.clone();
      move |c| queries::get_or_create_location(c, &new, 1_700_000_000).map_err(Into::into)
    })
    .await
    .unwrap();

  let second = conn
    .call({
      let new = new.clone();
      move |c| queries::get_or_create_location(c, &new, 1_700_000_500).map_err(Into::into)
    })
    .await
    .unwrap();

  assert_eq!(first.id, second.id);
  assert_eq!(first.geohash, "u33dbfcyegc0");
}

#[tokio::test]
async fn geo_event_references_existing_location() {
  let conn = open_test_db().await;

  let new = NewGeoLocation {
    latitude: 1.0,
    longitude: 2.0,
    geohash: "s00000000000".to_string(),
    country_code: None,
    country_name: None,
    state: None,
    state_code: None,
    city: None,
    postal_code: None,
    timezone: None,
  };

  let location_id = conn
    .call(move |c| {
      queries::get_or_create_location(c, &new, 1).map(|l| l.id).map_err(Into::into)
    })
    .await
    .unwrap();

  let event = NewGeoEvent {
    timestamp: 100,
    ip_address: "8.8.8.8".to_string(),
    hostname: Some("host-a".to_string()),
    location_id,
  };

  let event_id = conn
    .call(move |c| queries::insert_geo_event(c, &event).map_err(Into::into))
    .await
    .unwrap();
  assert!(event_id > 0);
}

#[tokio::test]
async fn access_log_debug_links_to_access_log_row() {
  let conn = open_test_db().await;

  let log = NewAccessLog {
    timestamp: 10,
    ip_address: "1.2.3.4".to_string(),
    status_code: 200,
    bytes_sent: 512,
    request_time: 0.01,
    ..Default::default()
  };

  let log_id = conn
    .call(move |c| queries::insert_access_log(c, &log).map_err(Into::into))
    .await
    .unwrap();

  let debug = NewAccessLogDebug {
    access_log_id: Some(log_id),
    created: 10,
    raw_line: "raw".to_string(),
    is_malformed: false,
    parse_error: None,
  };

  conn
    .call(move |c| queries::insert_access_log_debug(c, &debug).map_err(Into::into))
    .await
    .unwrap();
}

#[tokio::test]
async fn hourly_upsert_guards_against_divide_by_zero() {
  let conn = open_test_db().await;

  // A geo-only batch (total_request_time=0, total_requests=0) must not poison avg_request_time.
  let geo_only = HourlyMetrics {
    hour: 3600,
    total_geo_events: 5,
    ..Default::default()
  };

  conn
    .call(move |c| queries::upsert_hourly_stats(c, &geo_only).map_err(Into::into))
    .await
    .unwrap();

  let stats: Option<crate::models::HourlyStats> = conn
    .query_value(
      "SELECT hour, total_requests, total_geo_events, unique_ips, unique_countries, \
       total_bytes_sent, status_2xx, status_3xx, status_4xx, status_5xx, \
       avg_request_time, max_request_time, malformed_requests \
       FROM hourly_stats WHERE hour = 3600",
      (),
    )
    .await
    .unwrap();

  let stats = stats.unwrap();
  assert_eq!(stats.avg_request_time, 0.0);
  assert_eq!(stats.total_geo_events, 5);

  // A subsequent batch with real requests must compute a correct weighted mean, not panic or
  // divide by zero against the prior all-geo row.
  let with_requests = HourlyMetrics {
    hour: 3600,
    total_requests: 2,
    total_request_time: 1.0,
    max_request_time: 0.8,
    ..Default::default()
  };

  conn
    .call(move |c| queries::upsert_hourly_stats(c, &with_requests).map_err(Into::into))
    .await
    .unwrap();

  let stats: Option<crate::models::HourlyStats> = conn
    .query_value(
      "SELECT hour, total_requests, total_geo_events, unique_ips, unique_countries, \
       total_bytes_sent, status_2xx, status_3xx, status_4xx, status_5xx, \
       avg_request_time, max_request_time, malformed_requests \
       FROM hourly_stats WHERE hour = 3600",
      (),
    )
    .await
    .unwrap();
  let stats = stats.unwrap();
  assert_eq!(stats.total_requests, 2);
  assert_eq!(stats.avg_request_time, 0.5);
}

#[tokio::test]
async fn location_last_hit_refresh_is_set_based_and_monotonic() {
  let conn = open_test_db().await;

  let new = NewGeoLocation {
    latitude: 0.0,
    longitude: 0.0,
    geohash: "geohashone00".to_string(),
    country_code: None,
    country_name: None,
    state: None,
    state_code: None,
    city: None,
    postal_code: None,
    timezone: None,
  };

  let location_id = conn
    .call(move |c| queries::get_or_create_location(c, &new, 1).map(|l| l.id).map_err(Into::into))
    .await
    .unwrap();

  for ts in [100_i64, 300, 200] {
    let event = NewGeoEvent {
      timestamp: ts,
      ip_address: "9.9.9.9".to_string(),
      hostname: None,
      location_id,
    };
    conn
      .call(move |c| queries::insert_geo_event(c, &event).map_err(Into::into))
      .await
      .unwrap();
  }

  let updated = conn
    .call(|c| queries::refresh_location_last_hits(c).map_err(Into::into))
    .await
    .unwrap();
  assert_eq!(updated, 1);

  let last_hit: Option<i64> = conn
    .query_value(
      "SELECT last_hit FROM geo_locations WHERE id = ?1",
      crate::params![location_id],
    )
    .await
    .unwrap();
  assert_eq!(last_hit, Some(300));

  // Running again with no new events must be a no-op, not regress last_hit.
  let updated_again = conn
    .call(|c| queries::refresh_location_last_hits(c).map_err(Into::into))
    .await
    .unwrap();
  assert_eq!(updated_again, 0);
}

#[tokio::test]
async fn daily_rollup_is_none_for_empty_day() {
  let conn = open_test_db().await;
  let result = conn
    .call(|c| queries::compute_daily_rollup(c, 0, 86400).map_err(Into::into))
    .await
    .unwrap();
  assert!(result.is_none());
}

#[tokio::test]
async fn daily_rollup_picks_peak_hour_and_sums_counts() {
  let conn = open_test_db().await;

  let hours = [(0_i64, 10_i64), (3600, 50), (7200, 5)];
  for (hour, total_requests) in hours {
    let metrics = HourlyMetrics {
      hour,
      total_requests,
      total_request_time: total_requests as f64 * 0.1,
      max_request_time: 0.2,
      ..Default::default()
    };
    conn
      .call(move |c| queries::upsert_hourly_stats(c, &metrics).map_err(Into::into))
      .await
      .unwrap();
  }

  let daily = conn
    .call(|c| queries::compute_daily_rollup(c, 0, 86400).map_err(Into::into))
    .await
    .unwrap()
    .unwrap();

  assert_eq!(daily.total_requests, 65);
  assert_eq!(daily.peak_hour, Some(3600));
  assert_eq!(daily.peak_hour_requests, Some(50));
}

#[tokio::test]
async fn retention_sweep_deletes_only_rows_before_cutoff() {
  let conn = open_test_db().await;

  for hour in [0_i64, 3600, 7200] {
    let metrics = HourlyMetrics {
      hour,
      total_requests: 1,
      ..Default::default()
    };
    conn
      .call(move |c| queries::upsert_hourly_stats(c, &metrics).map_err(Into::into))
      .await
      .unwrap();
  }

  let deleted = conn
    .call(|c| queries::delete_hourly_stats_before(c, 3600).map_err(Into::into))
    .await
    .unwrap();
  assert_eq!(deleted, 1);

  let remaining: i64 = conn
    .query_value("SELECT COUNT(*) FROM hourly_stats", ())
    .await
    .unwrap()
    .unwrap();
  assert_eq!(remaining, 2);
}

#[tokio::test]
async fn summary_with_previous_computes_percent_change() {
  let conn = open_test_db().await;

  for (hour, total_requests) in [(0_i64, 10_i64), (3600, 20)] {
    let metrics = HourlyMetrics {
      hour,
      total_requests,
      ..Default::default()
    };
    conn
      .call(move |c| queries::upsert_hourly_stats(c, &metrics).map_err(Into::into))
      .await
      .unwrap();
  }

  let comparison = conn
    .call(|c| queries::summary_with_previous(c, 3600, 7200).map_err(Into::into))
    .await
    .unwrap();

  assert_eq!(comparison.current.total_requests, 20);
  assert_eq!(comparison.previous.unwrap().total_requests, 10);
  assert_eq!(comparison.percent_change_total_requests, Some(100.0));
}

#[tokio::test]
async fn summary_with_previous_has_no_previous_period_when_none_exists() {
  let conn = open_test_db().await;

  let metrics = HourlyMetrics {
    hour: 3600,
    total_requests: 5,
    ..Default::default()
  };
  conn
    .call(move |c| queries::upsert_hourly_stats(c, &metrics).map_err(Into::into))
    .await
    .unwrap();

  let comparison = conn
    .call(|c| queries::summary_with_previous(c, 3600, 7200).map_err(Into::into))
    .await
    .unwrap();

  assert!(comparison.previous.is_none());
  assert_eq!(comparison.percent_change_total_requests, None);
}

#[tokio::test]
async fn time_series_hourly_returns_rows_in_range() {
  let conn = open_test_db().await;

  for hour in [0_i64, 3600, 7200] {
    let metrics = HourlyMetrics {
      hour,
      total_requests: 1,
      ..Default::default()
    };
    conn
      .call(move |c| queries::upsert_hourly_stats(c, &metrics).map_err(Into::into))
      .await
      .unwrap();
  }

  let series = conn
    .call(|c| queries::time_series(c, 0, 7200, Granularity::Hourly).map_err(Into::into))
    .await
    .unwrap();

  match series {
    TimeSeries::Hourly(rows) => assert_eq!(rows.len(), 2),
    TimeSeries::Daily(_) => panic!("expected hourly series"),
  }
}
