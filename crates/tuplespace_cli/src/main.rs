//! Tuplespace CLI
//!
//! Command-line tools for space directories.
//!
//! # Commands
//!
//! - `inspect` - Display space metadata and container statistics
//! - `dump` - Print stored entries
//! - `verify` - Verify log integrity
//! - `compact` - Rewrite the log to reclaim space

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Tuplespace command-line tools.
#[derive(Parser)]
#[command(name = "tuplespace")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the space directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display space metadata and statistics
    Inspect {
        /// Show per-container details
        #[arg(short, long)]
        containers: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print stored entries
    Dump {
        /// Only entries of this container (name or numeric id)
        #[arg(short, long)]
        container: Option<String>,

        /// Maximum number of entries to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify log integrity
    Verify,

    /// Rewrite the log as a single snapshot frame
    Compact {
        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
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

    match cli.command {
        Commands::Inspect { containers, format } => {
            let path = cli.path.ok_or("Space path required for inspect")?;
            commands::inspect::run(&path, containers, format.parse()?)?;
        }
        Commands::Dump {
            container,
            limit,
            format,
        } => {
            let path = cli.path.ok_or("Space path required for dump")?;
            commands::dump::run(&path, container.as_deref(), limit, format.parse()?)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Space path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Compact { dry_run } => {
            let path = cli.path.ok_or("Space path required for compact")?;
            commands::compact::run(&path, dry_run)?;
        }
        Commands::Version => {
            println!("Tuplespace CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Tuplespace Core v{}", tuplespace_core::VERSION);
        }
    }

    Ok(())
}
