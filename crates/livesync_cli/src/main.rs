//! LiveSync CLI
//!
//! Command-line tools for exercising the live collection engine.
//!
//! # Commands
//!
//! - `simulate` - Run a live collection against an in-memory store with a scripted outage
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use commands::simulate::{OutputFormat, SimulateOptions};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// LiveSync command-line tools.
#[derive(Parser)]
#[command(name = "livesync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync a simulated collection through a change-feed outage
    Simulate {
        /// Collection name
        #[arg(short, long, default_value = "measurements")]
        collection: String,

        /// Project the subscription is scoped to
        #[arg(short, long, default_value = "demo")]
        project: String,

        /// Number of records seeded before the collection starts
        #[arg(short, long, default_value = "5")]
        records: usize,

        /// Total simulated run time in seconds
        #[arg(short, long, default_value = "60")]
        duration_secs: u64,

        /// Polling interval while the change feed is down
        #[arg(long, default_value = "15000")]
        poll_interval_ms: u64,

        /// Reconnect attempts before giving up (0 = unlimited)
        #[arg(short, long, default_value = "5")]
        max_attempts: u32,

        /// Seconds before the change feed goes down
        #[arg(long, default_value = "10")]
        outage_after_secs: u64,

        /// Length of the outage in seconds (0 = no outage)
        #[arg(long, default_value = "20")]
        outage_secs: u64,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Simulate {
            collection,
            project,
            records,
            duration_secs,
            poll_interval_ms,
            max_attempts,
            outage_after_secs,
            outage_secs,
            format,
        } => {
            let options = SimulateOptions {
                collection,
                project,
                records,
                duration: Duration::from_secs(duration_secs),
                poll_interval: Duration::from_millis(poll_interval_ms),
                max_attempts,
                outage_after: Duration::from_secs(outage_after_secs),
                outage: Duration::from_secs(outage_secs),
                format: format.parse::<OutputFormat>()?,
            };
            commands::simulate::run(options).await?;
        }
        Commands::Version => {
            println!("LiveSync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
