use arc_swap::ArcSwap;
use maxminddb::{geoip2::City, Reader};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use crate::error::GeoIpError;
use crate::ip_class::is_routable;

type MaxMindReader = Reader<Vec<u8>>;

const SUPPORTED_LOCALES: &[&str] = &["en", "de", "es", "fr", "ja", "pt-BR", "ru", "zh-CN"];

/// Resolved geographic data for one IP. `lat`/`lon` are always present when this type exists;
/// the enricher never returns a `GeoRecord` missing either (SPEC_FULL §4.3).
#[derive(Debug, Clone, PartialEq)]
pub struct GeoRecord {
  pub latitude: f64,
  pub longitude: f64,
  pub country_code: Option<String>,
  pub country_name: Option<String>,
  pub state: Option<String>,
  pub state_code: Option<String>,
  pub city: Option<String>,
  pub postal_code: Option<String>,
  pub timezone: Option<String>,
}

/// Hot-swappable GeoIP reader: loaded once at startup, swapped on demand, shared read-only.
///
/// Grounded on the maxminddb wrapper this codebase uses to back a SQLite scalar function; here
/// there's no SQLite function to register, so it's exposed as a plain resolver instead.
pub struct GeoIpReader {
  inner: ArcSwap<Option<MaxMindReader>>,
  locales: Vec<String>,
}

impl GeoIpReader {
  pub fn empty(locales: Vec<String>) -> Self {
    Self {
      inner: ArcSwap::from_pointee(None),
      locales: filter_locales(locales),
    }
  }

  pub fn load(path: impl AsRef<Path>, locales: Vec<String>) -> Result<Self, GeoIpError> {
    let reader = Reader::open_readfile(path)?;
    Ok(Self {
      inner: ArcSwap::from_pointee(Some(reader)),
      locales: filter_locales(locales),
    })
  }

  pub fn reload(&self, path: impl AsRef<Path>) -> Result<(), GeoIpError> {
    let reader = Reader::open_readfile(path)?;
    self.inner.store(Arc::new(Some(reader)));
    Ok(())
  }

  pub fn is_loaded(&self) -> bool {
    self.inner.load().is_some()
  }

  /// Resolve `ip` to a [`GeoRecord`]. Returns `Ok(None)` (not an error) for every case SPEC_FULL
  /// §4.3 treats as non-fatal: unroutable address classes, no database loaded, missing DB entries,
  /// entries with no coordinates. A database that fails to load at startup is a warning, not a
  /// fatal condition (SPEC_FULL §4.8), so lookups simply disable enrichment rather than error.
  pub fn resolve(&self, ip: IpAddr) -> Result<Option<GeoRecord>, GeoIpError> {
    if !is_routable(ip) {
      return Ok(None);
    }

    let guard = self.inner.load();
    let Some(reader) = guard.as_ref() else {
      return Ok(None);
    };

    let Some(city) = reader.lookup::<City>(ip)? else {
      return Ok(None);
    };

    let Some(location) = city.location.as_ref() else {
      return Ok(None);
    };
    let (Some(latitude), Some(longitude)) = (location.latitude, location.longitude) else {
      return Ok(None);
    };

    let country = city.country.as_ref();
    let subdivision = city.subdivisions.as_ref().and_then(|s| s.first());

    Ok(Some(GeoRecord {
      latitude,
      longitude,
      country_code: country.and_then(|c| c.iso_code).map(str::to_string),
      country_name: country.and_then(|c| self.localized_name(c.names.as_ref())),
      state: subdivision.and_then(|s| self.localized_name(s.names.as_ref())),
      state_code: subdivision.and_then(|s| s.iso_code).map(str::to_string),
      city: city.city.as_ref().and_then(|c| self.localized_name(c.names.as_ref())),
      postal_code: city.postal.as_ref().and_then(|p| p.code).map(str::to_string),
      timezone: location.time_zone.map(str::to_string),
    }))
  }

  fn localized_name(
    &self,
    names: Option<&std::collections::BTreeMap<&str, &str>>,
  ) -> Option<String> {
    let names = names?;
    for locale in &self.locales {
      if let Some(name) = names.get(locale.as_str()) {
        return Some(name.to_string());
      }
    }
    names.get("en").map(|s| s.to_string())
  }
}

fn filter_locales(locales: Vec<String>) -> Vec<String> {
  let filtered: Vec<String> = locales
    .into_iter()
    .filter(|l| SUPPORTED_LOCALES.contains(&l.as_str()))
    .collect();

  if filtered.is_empty() {
    vec!["en".to_string()]
  } else {
    filtered
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn resolve_on_loopback_is_none_without_touching_the_database() {
    let reader = GeoIpReader::empty(vec!["en".to_string()]);
    let result = reader.resolve("127.0.0.1".parse().unwrap()).unwrap();
    assert_eq!(result, None);
  }

  #[test]
  fn resolve_on_a_public_ip_is_none_not_an_error_when_no_database_is_loaded() {
    let reader = GeoIpReader::empty(vec!["en".to_string()]);
    assert!(!reader.is_loaded());
    let result = reader.resolve("8.8.8.8".parse().unwrap()).unwrap();
    assert_eq!(result, None);
  }

  #[test]
  fn unsupported_locales_fall_back_to_english() {
    let reader = GeoIpReader::empty(vec!["klingon".to_string()]);
    assert_eq!(reader.locales, vec!["en".to_string()]);
  }
}
