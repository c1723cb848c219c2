use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "stowage")]
#[command(author, version, about = "Quota and notification layers for an image registry")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Database schema management
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },

    /// Inspect quota settings and usage
    Quota {
        #[command(subcommand)]
        command: QuotaCommands,
    },

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Print the current schema version
    Version,

    /// Apply pending migrations
    Sync,
}

#[derive(Subcommand)]
pub enum QuotaCommands {
    /// Print consumed, allowed and remaining storage for an owner
    Usage {
        /// Owner (tenant) id
        #[arg(long)]
        owner: String,
    },

    /// Print the effective quota settings
    Show,
}
