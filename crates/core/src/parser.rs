use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use std::net::IpAddr;
use std::sync::LazyLock;

/// nginx combined-format superset: ip, remote user, timestamp, the raw `"METHOD URL VERSION"`
/// request line, status, bytes, referrer, user agent, request time, connect time, host.
static COMBINED_LOG_RE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(
    r#"^(?P<ip>\S+)\s+\S+\s+(?P<user>\S+)\s+\[(?P<time>[^\]]+)\]\s+"(?P<request>[^"]*)"\s+(?P<status>\d{3})\s+(?P<bytes>\S+)\s+"(?P<referrer>[^"]*)"\s+"(?P<agent>[^"]*)"\s+(?P<request_time>\S+)\s+(?P<connect_time>\S+)\s+(?P<host>\S+)\s*$"#,
  )
  .expect("valid regex")
});

static REQUEST_LINE_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^(?P<method>[A-Za-z]+)\s+(?P<url>\S+)\s+(?P<version>HTTP/\S+)$").expect("valid regex"));

static IP_ONLY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(?P<ip>\S+)").expect("valid regex"));

const VALID_METHODS: &[&str] = &[
  "GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS", "CONNECT", "TRACE",
];

#[derive(Debug, Clone, PartialEq)]
pub struct AccessFields {
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
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRecord {
  pub ip: Option<IpAddr>,
  pub timestamp: DateTime<Utc>,
  pub access: Option<AccessFields>,
  pub malformed: bool,
  pub parse_error: Option<String>,
  pub raw_line: String,
}

fn normalize(field: &str) -> Option<String> {
  if field == "-" {
    None
  } else {
    Some(field.to_string())
  }
}

fn normalize_i64(field: &str) -> i64 {
  field.parse().unwrap_or(0)
}

fn normalize_f64(field: &str) -> f64 {
  field.parse().unwrap_or(0.0)
}

fn normalize_opt_f64(field: &str) -> Option<f64> {
  normalize(field).and_then(|s| s.parse().ok())
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
  DateTime::parse_from_str(raw, "%d/%b/%Y:%H:%M:%S %z")
    .map(|dt| dt.with_timezone(&Utc))
    .unwrap_or_else(|_| Utc::now())
}

/// Ordered malformed/probe classification (SPEC_FULL §4.2). First trigger wins.
fn classify(request_raw: &str, method: Option<&str>, status: i64) -> Option<&'static str> {
  if contains_marker(request_raw, &[0x16, 0x03]) {
    return Some("tls handshake to http port");
  }
  if request_raw.starts_with("SSH-") || contains_marker(request_raw, &[0x53, 0x53, 0x48]) {
    return Some("ssh probe");
  }
  if request_raw.contains("\u{ff}SMB") || request_raw.contains("SMBr") || request_raw.contains("NT LM") {
    return Some("smb probe");
  }
  let no_method = method.is_none() || method == Some("-");
  if no_method && status == 400 {
    return Some("tls probe to https-only port");
  }
  if no_method {
    return Some("no http method");
  }
  if let Some(m) = method {
    if !VALID_METHODS.contains(&m) {
      return Some("invalid http method");
    }
  }
  match status {
    408 => Some("request timeout"),
    444 => Some("nginx client abort (444)"),
    499 => Some("client closed connection (499)"),
    _ => None,
  }
}

/// Checks both the raw-byte form and the backslash-escaped textual form of `bytes`, since a
/// log-writing process may emit either depending on how it escapes control characters.
fn contains_marker(s: &str, bytes: &[u8]) -> bool {
  let raw: Vec<u8> = bytes.to_vec();
  if s.as_bytes().windows(raw.len()).any(|w| w == raw.as_slice()) {
    return true;
  }
  let escaped: String = bytes.iter().map(|b| format!("\\x{b:02x}")).collect();
  s.contains(&escaped)
}

/// Full nginx-combined-format parse used when `send_logs` is enabled.
pub fn parse_access_line(line: &str) -> ParsedRecord {
  let Some(caps) = COMBINED_LOG_RE.captures(line) else {
    return ParsedRecord {
      ip: None,
      timestamp: Utc::now(),
      access: None,
      malformed: true,
      parse_error: Some("line did not match expected log format".to_string()),
      raw_line: line.to_string(),
    };
  };

  let ip = caps["ip"].parse::<IpAddr>().ok();
  let timestamp = parse_timestamp(&caps["time"]);
  let request_raw = &caps["request"];

  let (method, url, http_version) = match REQUEST_LINE_RE.captures(request_raw) {
    Some(req) => (
      Some(req["method"].to_string()),
      Some(req["url"].to_string()),
      Some(req["version"].to_string()),
    ),
    None => (None, None, None),
  };

  let status_code = normalize_i64(&caps["status"]);
  let tag = classify(request_raw, method.as_deref(), status_code);

  let access = AccessFields {
    remote_user: normalize(&caps["user"]),
    method,
    url,
    http_version,
    status_code,
    bytes_sent: normalize_i64(&caps["bytes"]),
    referrer: normalize(&caps["referrer"]),
    user_agent: normalize(&caps["agent"]),
    request_time: normalize_f64(&caps["request_time"]),
    connect_time: normalize_opt_f64(&caps["connect_time"]),
    host: normalize(&caps["host"]),
  };

  ParsedRecord {
    ip,
    timestamp,
    access: Some(access),
    malformed: tag.is_some(),
    parse_error: tag.map(str::to_string),
    raw_line: line.to_string(),
  }
}

/// IP-only recognition used when full access-log capture is disabled (`send_logs=false`).
pub fn parse_ip_only_line(line: &str) -> ParsedRecord {
  let ip = IP_ONLY_RE
    .captures(line)
    .and_then(|c| c["ip"].parse::<IpAddr>().ok());

  ParsedRecord {
    ip,
    timestamp: Utc::now(),
    access: None,
    malformed: ip.is_none(),
    parse_error: if ip.is_none() {
      Some("line did not match expected log format".to_string())
    } else {
      None
    },
    raw_line: line.to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_well_formed_request() {
    let line = r#"203.0.113.5 - - [10/Oct/2023:13:55:36 +0000] "GET /index.html HTTP/1.1" 200 612 "-" "Mozilla/5.0" 0.002 - example.com"#;
    let record = parse_access_line(line);
    assert!(!record.malformed);
    assert_eq!(record.ip, Some("203.0.113.5".parse().unwrap()));
    let access = record.access.unwrap();
    assert_eq!(access.method.as_deref(), Some("GET"));
    assert_eq!(access.status_code, 200);
    assert_eq!(access.bytes_sent, 612);
    assert_eq!(access.referrer, None);
    assert_eq!(access.connect_time, None);
  }

  #[test]
  fn classifies_tls_probe_to_http_port() {
    let line = "203.0.113.9 - - [10/Oct/2023:13:55:36 +0000] \"\u{16}\u{3}garbage\" 400 0 \"-\" \"-\" 0.000 - example.com";
    let record = parse_access_line(line);
    assert!(record.malformed);
    assert_eq!(record.parse_error.as_deref(), Some("tls handshake to http port"));
  }

  #[test]
  fn classifies_ssh_probe() {
    let line = r#"203.0.113.9 - - [10/Oct/2023:13:55:36 +0000] "SSH-2.0-libssh" 400 0 "-" "-" 0.000 - example.com"#;
    let record = parse_access_line(line);
    assert_eq!(record.parse_error.as_deref(), Some("ssh probe"));
  }

  #[test]
  fn classifies_missing_method_as_tls_probe_to_https_port_when_400() {
    let line = r#"203.0.113.9 - - [10/Oct/2023:13:55:36 +0000] "-" 400 0 "-" "-" 0.000 - example.com"#;
    let record = parse_access_line(line);
    assert_eq!(record.parse_error.as_deref(), Some("tls probe to https-only port"));
  }

  #[test]
  fn classifies_missing_method_other_status_as_no_method() {
    let line = r#"203.0.113.9 - - [10/Oct/2023:13:55:36 +0000] "-" 408 0 "-" "-" 0.000 - example.com"#;
    let record = parse_access_line(line);
    // 408 with no method still triggers "no http method" ahead of "request timeout": method
    // absence is checked before the status-only triggers in the ordered table.
    assert_eq!(record.parse_error.as_deref(), Some("no http method"));
  }

  #[test]
  fn classifies_invalid_method() {
    let line = r#"203.0.113.9 - - [10/Oct/2023:13:55:36 +0000] "FOO /x HTTP/1.1" 200 0 "-" "-" 0.000 - example.com"#;
    let record = parse_access_line(line);
    assert_eq!(record.parse_error.as_deref(), Some("invalid http method"));
  }

  #[test]
  fn classifies_client_closed_connection_499() {
    let line = r#"203.0.113.9 - - [10/Oct/2023:13:55:36 +0000] "GET /x HTTP/1.1" 499 0 "-" "-" 0.000 - example.com"#;
    let record = parse_access_line(line);
    assert_eq!(record.parse_error.as_deref(), Some("client closed connection (499)"));
  }

  #[test]
  fn unmatched_line_is_malformed_with_generic_error() {
    let record = parse_access_line("not a log line at all");
    assert!(record.malformed);
    assert_eq!(record.ip, None);
    assert_eq!(record.parse_error.as_deref(), Some("line did not match expected log format"));
  }

  #[test]
  fn malformed_numeric_fields_default_to_zero() {
    let line = r#"203.0.113.5 - - [10/Oct/2023:13:55:36 +0000] "GET /x HTTP/1.1" abc xyz "-" "-" notafloat - example.com"#;
    // status must be \d{3} to match at all; use a parseable status but garbage bytes/time.
    let line2 = r#"203.0.113.5 - - [10/Oct/2023:13:55:36 +0000] "GET /x HTTP/1.1" 200 xyz "-" "-" notafloat - example.com"#;
    assert!(!COMBINED_LOG_RE.is_match(line));
    let record = parse_access_line(line2);
    let access = record.access.unwrap();
    assert_eq!(access.bytes_sent, 0);
    assert_eq!(access.request_time, 0.0);
  }

  #[test]
  fn bad_timestamp_defaults_to_now() {
    let line = r#"203.0.113.5 - - [not-a-date] "GET /x HTTP/1.1" 200 1 "-" "-" 0.0 - example.com"#;
    let before = Utc::now();
    let record = parse_access_line(line);
    assert!(record.timestamp >= before);
  }
}
