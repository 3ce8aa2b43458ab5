//! CLI module
//!
//! Command-line interface for running harvests.
//!
//! # Commands
//!
//! - `init` - Create the storage tables
//! - `run` - Harvest one or more collections
//! - `status` - Show checkpoints
//! - `reset` - Force a collection to be harvested from the start

mod commands;
mod runner;

pub use commands::{Cli, Commands, OutputFormat};
pub use runner::Runner;
