//! Geosync CLI
//!
//! Command-line tools for a Geo secondary's replication registry.
//!
//! # Commands
//!
//! - `status` - Show sync and verification progress per replicator class
//! - `capacity` - Show the per-class concurrency budgets
//! - `inspect` - Display one registry record
//! - `reverify` - Queue verified records for another verification
//! - `events` - Apply primary events from a JSON lines file
//! - `compact` - Rewrite the registry journal as a snapshot
//! - `run` - Replicate from a primary directory until interrupted

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Geo replication registry tools.
#[derive(Parser)]
#[command(name = "geosync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the registry data directory
    #[arg(global = true, short, long)]
    data_dir: Option<PathBuf>,

    /// Path to a JSON configuration file
    #[arg(global = true, short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show sync and verification progress per replicator class
    Status {
        /// Only show this replicator class
        #[arg(short, long)]
        replicator: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show the per-class concurrency budgets
    Capacity {
        /// Treat these classes as having verification disabled
        #[arg(long)]
        without_verification: Vec<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Display one registry record
    Inspect {
        /// Replicator class
        #[arg(short, long)]
        replicator: String,

        /// Resource id
        #[arg(short, long)]
        id: u64,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Queue verified records for another verification
    Reverify {
        /// Replicator class
        #[arg(short, long)]
        replicator: String,

        /// Only this resource
        #[arg(short, long)]
        id: Option<u64>,

        /// Maximum records to queue (defaults to the reverification batch size)
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Apply primary events from a JSON lines file ("-" for stdin)
    Events {
        /// Events file
        file: PathBuf,
    },

    /// Rewrite the registry journal as a snapshot
    Compact,

    /// Replicate from a primary directory until interrupted
    Run {
        /// Primary site root
        #[arg(long)]
        primary: PathBuf,

        /// Secondary site root
        #[arg(long)]
        secondary: PathBuf,

        /// Seconds between scheduler cycles
        #[arg(short, long, default_value = "60")]
        interval: u64,

        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Status { replicator, format } => {
            let data_dir = cli.data_dir.ok_or("Data directory required for status")?;
            commands::status::run(&data_dir, replicator.as_deref(), &format)?;
        }
        Commands::Capacity {
            without_verification,
            format,
        } => {
            commands::capacity::run(&config, &without_verification, &format)?;
        }
        Commands::Inspect {
            replicator,
            id,
            format,
        } => {
            let data_dir = cli.data_dir.ok_or("Data directory required for inspect")?;
            commands::inspect::run(&data_dir, &replicator, id, &format)?;
        }
        Commands::Reverify {
            replicator,
            id,
            limit,
        } => {
            let data_dir = cli.data_dir.ok_or("Data directory required for reverify")?;
            commands::reverify::run(&data_dir, &config, &replicator, id, limit)?;
        }
        Commands::Events { file } => {
            let data_dir = cli.data_dir.ok_or("Data directory required for events")?;
            commands::events::run(&data_dir, &config, &file)?;
        }
        Commands::Compact => {
            let data_dir = cli.data_dir.ok_or("Data directory required for compact")?;
            commands::compact::run(&data_dir)?;
        }
        Commands::Run {
            primary,
            secondary,
            interval,
            once,
        } => {
            let data_dir = cli.data_dir.ok_or("Data directory required for run")?;
            commands::run::run(&data_dir, config, &primary, &secondary, interval, once)?;
        }
        Commands::Version => {
            println!("Geosync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
