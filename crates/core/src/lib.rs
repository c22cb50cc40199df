#![allow(clippy::needless_return)]

pub mod aggregator;
pub mod config;
pub mod error;
pub mod parser;
pub mod persister;
pub mod scheduler;
pub mod supervisor;
pub mod tailer;

pub use config::Config;
pub use error::{PipelineError, Result};
pub use supervisor::Supervisor;
