//! Command-line definition.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Batch-sync a date-structured music library to a media server
#[derive(Parser, Debug)]
#[command(
    name = "tracksync",
    version,
    about = "Encode, mirror and index a date-structured music library, one day at a time",
    after_help = "EXAMPLES:\n    \
        # Sync a collection export\n    \
        tracksync sync collection.json /data/tracks-output\n\n    \
        # Sync an existing YYYY/MM month/DD tree\n    \
        tracksync sync-dir /data/tracks /data/tracks-output --full-scan\n\n    \
        # Show where the next run resumes\n    \
        tracksync status"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, env = "TRACKSYNC_CONFIG", global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Minimum log level: trace, debug, info, warn, error
    #[arg(long, default_value = "info", global = true, value_name = "LEVEL")]
    pub log_level: String,

    /// Console log format: pretty, compact, json
    #[arg(long, global = true, value_name = "FORMAT")]
    pub log_format: Option<String>,

    /// Also write logs to this file (truncated on every run)
    #[arg(long, global = true, value_name = "FILE")]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Sync every record of a collection manifest
    Sync {
        /// JSON collection manifest
        #[arg(value_name = "MANIFEST")]
        manifest: PathBuf,

        /// Root of the date-structured output tree
        #[arg(value_name = "OUTPUT_ROOT")]
        output_root: PathBuf,

        /// Ask the media server for a full rather than quick scan
        #[arg(long)]
        full_scan: bool,
    },

    /// Sync an existing date-structured directory tree
    SyncDir {
        /// Tree laid out as YYYY/MM month/DD
        #[arg(value_name = "INPUT_ROOT")]
        input_root: PathBuf,

        #[arg(value_name = "OUTPUT_ROOT")]
        output_root: PathBuf,

        #[arg(long)]
        full_scan: bool,
    },

    /// Print the source->destination mappings of a manifest
    Mappings {
        #[arg(value_name = "MANIFEST")]
        manifest: PathBuf,

        #[arg(value_name = "OUTPUT_ROOT")]
        output_root: PathBuf,
    },

    /// Print the last committed date context
    Status,

    /// Check that the remote store answers
    Healthcheck {
        /// Also authenticate against the media server
        #[arg(long)]
        index: bool,
    },

    /// Trigger a media server scan and wait for it
    Scan {
        #[arg(long)]
        full: bool,
    },

    /// Store the media server password in the OS keychain
    SetPassword {
        #[arg(long, env = "TRACKSYNC_PASSWORD", hide_env_values = true)]
        password: String,
    },
}
