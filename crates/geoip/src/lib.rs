#![allow(clippy::needless_return)]

pub mod cache;
pub mod error;
pub mod geohash;
pub mod ip_class;
pub mod reader;

pub use cache::LocationCache;
pub use error::GeoIpError;
pub use ip_class::is_routable;
pub use reader::{GeoIpReader, GeoRecord};
