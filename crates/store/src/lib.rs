#![allow(clippy::needless_return)]

pub mod connection;
pub mod error;
pub mod extension;
pub mod models;
pub mod params;
pub mod queries;
pub mod rows;

pub use connection::Connection;
pub use error::Error;
pub use extension::{connect_sqlite, connect_sqlite_in_memory};
pub use models::{Granularity, Summary, SummaryComparison, TimeSeries};
pub use params::{Params, ToSqlType};
pub use rows::{Row, Rows, ValueType};

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests;
