//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod init;
mod ledger;
mod migrate;
mod state;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use silverledger::Settings;

#[derive(Parser)]
#[command(name = "silverledger")]
#[command(about = "Crawl ledger, deduplication and checkpoint administration")]
#[command(version)]
pub struct Cli {
    /// Config file path (TOML)
    #[arg(short, long, global = true, env = "SILVER_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory (overrides config file and SILVER_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Create directories and apply ledger schema migrations
    Init,

    /// Show ledger statistics
    Stats {
        /// Restrict to one source
        #[arg(short, long)]
        source: Option<String>,
    },

    /// Drop stored signatures from duplicate entries
    Compact,

    /// Delete old failed entries and quota rows
    Cleanup {
        /// Delete failed entries not updated for this many days
        #[arg(long, default_value = "30")]
        failed_older_than_days: i64,
        /// Delete daily quota rows older than this many days
        #[arg(long, default_value = "90")]
        quota_older_than_days: i64,
    },

    /// Copy the ledger from one database to another
    Migrate {
        /// Source database (SQLite path or postgres:// URL)
        #[arg(long)]
        from: String,
        /// Target database (SQLite path or postgres:// URL)
        #[arg(long)]
        to: String,
        /// Rows per batch
        #[arg(long, default_value = "1000")]
        batch_size: usize,
        /// Only count rows, copy nothing
        #[arg(long)]
        dry_run: bool,
    },

    /// Inspect or clean up source locks
    Locks {
        #[command(subcommand)]
        command: LockCommands,
    },

    /// Inspect run checkpoints
    Checkpoint {
        #[command(subcommand)]
        command: CheckpointCommands,
    },
}

#[derive(Subcommand)]
enum LockCommands {
    /// List lock files and their holders
    Status,
    /// Remove lock files older than the given age
    Cleanup {
        /// Maximum lock age in hours (defaults to the configured stale age)
        #[arg(long)]
        max_age_hours: Option<u64>,
    },
}

#[derive(Subcommand)]
enum CheckpointCommands {
    /// Print a checkpoint file
    Show {
        /// Checkpoint file path
        path: PathBuf,
    },
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = match cli.config {
        Some(ref path) => Settings::from_file(path)?,
        None => Settings::default(),
    }
    .with_env_overrides();
    let settings = match cli.data_dir {
        Some(data_dir) => Settings {
            data_dir,
            ..settings
        },
        None => settings,
    }
    .resolve_paths();

    match cli.command {
        Commands::Init => init::cmd_init(&settings).await,
        Commands::Stats { source } => ledger::cmd_stats(&settings, source.as_deref()).await,
        Commands::Compact => ledger::cmd_compact(&settings).await,
        Commands::Cleanup {
            failed_older_than_days,
            quota_older_than_days,
        } => {
            ledger::cmd_cleanup(&settings, failed_older_than_days, quota_older_than_days).await
        }
        Commands::Migrate {
            from,
            to,
            batch_size,
            dry_run,
        } => migrate::cmd_migrate(&settings, &from, &to, batch_size, dry_run).await,
        Commands::Locks { command } => match command {
            LockCommands::Status => state::cmd_locks_status(&settings),
            LockCommands::Cleanup { max_age_hours } => {
                state::cmd_locks_cleanup(&settings, max_age_hours)
            }
        },
        Commands::Checkpoint { command } => match command {
            CheckpointCommands::Show { path } => state::cmd_checkpoint_show(&path),
        },
    }
}
