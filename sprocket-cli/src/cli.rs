//! CLI argument parsing definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fetch, pin and build every configured plugin
    Sync {
        /// Build plugins in parallel, bounded by max_concurrent_builds
        #[arg(long)]
        concurrent: bool,

        /// Run plugin tests after building
        #[arg(long)]
        test: bool,

        /// Refresh every plugin even when its source and binary are cached
        #[arg(long)]
        update: bool,
    },

    /// Sync every plugin, then load the binaries and report the modules
    Load {
        /// Build plugins in parallel, bounded by max_concurrent_builds
        #[arg(long)]
        concurrent: bool,
    },

    /// List configured plugins and their resolved paths
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Configuration management commands
    Config {
        #[command(subcommand)]
        config_cmd: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        #[arg(long, value_name = "PATH")]
        config_file: PathBuf,
    },

    /// Generate a sample configuration file
    Generate {
        /// Output file path, stdout when omitted
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}
