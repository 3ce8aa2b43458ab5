//! CLI commands and argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Harvest cursor-paginated collections into a local database
#[derive(Parser, Debug)]
#[command(name = "cursor-harvest")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Settings file (YAML or JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Database file (overrides storage.path)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// API token (overrides auth.token and auth.token_env)
    #[arg(long, global = true)]
    pub token: Option<String>,

    /// Output format
    #[arg(short, long, global = true, default_value = "json")]
    pub format: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the storage tables
    Init,

    /// Harvest collections, resuming from their checkpoints
    Run {
        /// Collection to harvest (repeatable)
        #[arg(long = "collection", value_name = "ID")]
        collections: Vec<String>,

        /// File with one collection id per line
        #[arg(long)]
        collections_file: Option<PathBuf>,
    },

    /// Show checkpoints
    Status {
        /// Only this collection
        #[arg(long, value_name = "ID")]
        collection: Option<String>,
    },

    /// Delete a checkpoint so the next run starts over
    Reset {
        /// Collection to reset
        #[arg(long, value_name = "ID")]
        collection: String,
    },
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// JSON output (one message per line)
    Json,
    /// Human-readable output
    Pretty,
}
