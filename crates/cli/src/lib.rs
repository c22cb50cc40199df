#![allow(clippy::needless_return)]

mod args;

pub use args::{BackfillArgs, DefaultCommandLineArgs, SubCommands};
