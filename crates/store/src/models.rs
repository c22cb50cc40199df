use serde::{Deserialize, Serialize};

/// A resolved, deduplicated location. `geohash` is the 12-character dedup key (SPEC_FULL §4.4).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
  pub id: i64,
  pub latitude: f64,
  pub longitude: f64,
  pub geohash: String,
  pub country_code: Option<String>,
  pub country_name: Option<String>,
  pub state: Option<String>,
  pub state_code: Option<String>,
  pub city: Option<String>,
  pub postal_code: Option<String>,
  pub timezone: Option<String>,
  pub last_hit: Option<i64>,
  pub created: i64,
}

/// Fields needed to create a location the first time a geohash is seen.
#[derive(Debug, Clone)]
pub struct NewGeoLocation {
  pub latitude: f64,
  pub longitude: f64,
  pub geohash: String,
  pub country_code: Option<String>,
  pub country_name: Option<String>,
  pub state: Option<String>,
  pub state_code: Option<String>,
  pub city: Option<String>,
  pub postal_code: Option<String>,
  pub timezone: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewGeoEvent {
  pub timestamp: i64,
  pub ip_address: String,
  pub hostname: Option<String>,
  pub location_id: i64,
}

#[derive(Debug, Clone, Default)]
pub struct NewAccessLog {
  pub timestamp: i64,
  pub ip_address: String,
  pub remote_user: Option<String>,
  pub method: Option<String>,
  pub url: Option<String>,
  pub http_version: Option<String>,
  pub status_code: i64,
  pub bytes_sent: i64,
  pub referrer: Option<String>,
  pub user_agent: Option<String>,
  pub request_time: f64,
  pub connect_time: Option<f64>,
  pub host: Option<String>,
  pub country_code: Option<String>,
  pub country_name: Option<String>,
  pub city: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewAccessLogDebug {
  pub access_log_id: Option<i64>,
  pub created: i64,
  pub raw_line: String,
  pub is_malformed: bool,
  pub parse_error: Option<String>,
}

/// In-batch hourly accumulation merged into `hourly_stats` on commit (SPEC_FULL §4.6).
#[derive(Debug, Clone, Default)]
pub struct HourlyMetrics {
  pub hour: i64,
  pub total_requests: i64,
  pub total_geo_events: i64,
  pub unique_ips: i64,
  pub unique_countries: i64,
  pub total_bytes_sent: i64,
  pub status_2xx: i64,
  pub status_3xx: i64,
  pub status_4xx: i64,
  pub status_5xx: i64,
  pub total_request_time: f64,
  pub max_request_time: f64,
  pub malformed_requests: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HourlyStats {
  pub hour: i64,
  pub total_requests: i64,
  pub total_geo_events: i64,
  pub unique_ips: i64,
  pub unique_countries: i64,
  pub total_bytes_sent: i64,
  pub status_2xx: i64,
  pub status_3xx: i64,
  pub status_4xx: i64,
  pub status_5xx: i64,
  pub avg_request_time: f64,
  pub max_request_time: f64,
  pub malformed_requests: i64,
}

/// Aggregate over an arbitrary `[start, end)` hour-aligned range, with an optional same-length
/// previous-period comparison (SPEC_FULL §6 read-API surface).
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Summary {
  pub total_requests: i64,
  pub total_geo_events: i64,
  pub unique_ips: i64,
  pub unique_countries: i64,
  pub total_bytes_sent: i64,
  pub status_2xx: i64,
  pub status_3xx: i64,
  pub status_4xx: i64,
  pub status_5xx: i64,
  pub avg_request_time: f64,
  pub max_request_time: f64,
  pub malformed_requests: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryComparison {
  pub current: Summary,
  pub previous: Option<Summary>,
  /// Percent change of `total_requests`, current vs. previous; `None` when there's no previous
  /// period or it had zero requests.
  pub percent_change_total_requests: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Granularity {
  Hourly,
  Daily,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TimeSeries {
  Hourly(Vec<HourlyStats>),
  Daily(Vec<DailyStats>),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DailyStats {
  pub date: i64,
  pub total_requests: i64,
  pub total_geo_events: i64,
  pub unique_ips: i64,
  pub unique_countries: i64,
  pub total_bytes_sent: i64,
  pub status_2xx: i64,
  pub status_3xx: i64,
  pub status_4xx: i64,
  pub status_5xx: i64,
  pub avg_request_time: f64,
  pub max_request_time: f64,
  pub malformed_requests: i64,
  pub peak_hour: Option<i64>,
  pub peak_hour_requests: Option<i64>,
}
