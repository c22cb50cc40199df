//! Embedded bootstrap schema.
//!
//! A single idempotent script rather than a versioned migration chain: schema migration
//! machinery is an external collaborator for this crate, not a feature it owns.

const BOOTSTRAP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS geo_locations (
  id            INTEGER PRIMARY KEY,
  latitude      REAL NOT NULL,
  longitude     REAL NOT NULL,
  geohash       TEXT NOT NULL UNIQUE,
  country_code  TEXT,
  country_name  TEXT,
  state         TEXT,
  state_code    TEXT,
  city          TEXT,
  postal_code   TEXT,
  timezone      TEXT,
  last_hit      INTEGER,
  created       INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS geo_events (
  id            INTEGER PRIMARY KEY,
  timestamp     INTEGER NOT NULL,
  ip_address    TEXT NOT NULL,
  hostname      TEXT,
  location_id   INTEGER NOT NULL REFERENCES geo_locations(id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_geo_events_timestamp ON geo_events(timestamp);
CREATE INDEX IF NOT EXISTS idx_geo_events_location ON geo_events(location_id);

CREATE TABLE IF NOT EXISTS access_logs (
  id            INTEGER PRIMARY KEY,
  timestamp     INTEGER NOT NULL,
  ip_address    TEXT NOT NULL,
  remote_user   TEXT,
  method        TEXT,
  url           TEXT,
  http_version  TEXT,
  status_code   INTEGER NOT NULL,
  bytes_sent    INTEGER NOT NULL,
  referrer      TEXT,
  user_agent    TEXT,
  request_time  REAL NOT NULL,
  connect_time  REAL,
  host          TEXT,
  country_code  TEXT,
  country_name  TEXT,
  city          TEXT
);
CREATE INDEX IF NOT EXISTS idx_access_logs_timestamp ON access_logs(timestamp);
CREATE INDEX IF NOT EXISTS idx_access_logs_ip ON access_logs(ip_address);
CREATE INDEX IF NOT EXISTS idx_access_logs_status ON access_logs(status_code);

CREATE TABLE IF NOT EXISTS access_log_debug (
  id             INTEGER PRIMARY KEY,
  access_log_id  INTEGER UNIQUE REFERENCES access_logs(id) ON DELETE SET NULL,
  created        INTEGER NOT NULL,
  raw_line       TEXT NOT NULL,
  is_malformed   INTEGER NOT NULL,
  parse_error    TEXT
);
CREATE INDEX IF NOT EXISTS idx_access_log_debug_created ON access_log_debug(created);

CREATE TABLE IF NOT EXISTS hourly_stats (
  id                  INTEGER PRIMARY KEY,
  hour                INTEGER NOT NULL UNIQUE,
  total_requests      INTEGER NOT NULL DEFAULT 0,
  total_geo_events    INTEGER NOT NULL DEFAULT 0,
  unique_ips          INTEGER NOT NULL DEFAULT 0,
  unique_countries    INTEGER NOT NULL DEFAULT 0,
  total_bytes_sent    INTEGER NOT NULL DEFAULT 0,
  status_2xx          INTEGER NOT NULL DEFAULT 0,
  status_3xx          INTEGER NOT NULL DEFAULT 0,
  status_4xx          INTEGER NOT NULL DEFAULT 0,
  status_5xx          INTEGER NOT NULL DEFAULT 0,
  avg_request_time    REAL NOT NULL DEFAULT 0.0,
  max_request_time    REAL NOT NULL DEFAULT 0.0,
  malformed_requests  INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS daily_stats (
  id                  INTEGER PRIMARY KEY,
  date                INTEGER NOT NULL UNIQUE,
  total_requests      INTEGER NOT NULL DEFAULT 0,
  total_geo_events    INTEGER NOT NULL DEFAULT 0,
  unique_ips          INTEGER NOT NULL DEFAULT 0,
  unique_countries    INTEGER NOT NULL DEFAULT 0,
  total_bytes_sent    INTEGER NOT NULL DEFAULT 0,
  status_2xx          INTEGER NOT NULL DEFAULT 0,
  status_3xx          INTEGER NOT NULL DEFAULT 0,
  status_4xx          INTEGER NOT NULL DEFAULT 0,
  status_5xx          INTEGER NOT NULL DEFAULT 0,
  avg_request_time    REAL NOT NULL DEFAULT 0.0,
  max_request_time    REAL NOT NULL DEFAULT 0.0,
  malformed_requests  INTEGER NOT NULL DEFAULT 0,
  peak_hour           INTEGER,
  peak_hour_requests  INTEGER
);
"#;

pub(crate) fn bootstrap(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
  conn.execute_batch(BOOTSTRAP_SQL)
}
