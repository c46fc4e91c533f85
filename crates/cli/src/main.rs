//! DRC-IO CLI
//!
//! A command-line tool for inspecting the node-resident disk bandwidth
//! controller: current status, applied limits and component health.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{health, limits, status, watch};

/// DRC-IO controller CLI
#[derive(Parser)]
#[command(name = "drcio")]
#[command(author, version, about = "CLI for the DRC-IO bandwidth controller", long_about = None)]
pub struct Cli {
    /// Agent endpoint URL (can also be set via DRCIO_API_URL env var)
    #[arg(long, env = "DRCIO_API_URL", default_value = "http://localhost:8080")]
    pub api_url: String,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the controller status on a node
    Status,

    /// Show bandwidth limits currently in force
    Limits,

    /// Poll the controller status continuously
    Watch {
        /// Poll interval in seconds
        #[arg(long, short, default_value_t = 5)]
        interval: u64,

        /// Stop after this many samples (runs forever if omitted)
        #[arg(long, short)]
        count: Option<u64>,
    },

    /// Show agent component health
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let client = client::ApiClient::new(&cli.api_url)?;

    match cli.command {
        Commands::Status => {
            status::show_status(&client, cli.format).await?;
        }
        Commands::Limits => {
            limits::show_limits(&client, cli.format).await?;
        }
        Commands::Watch { interval, count } => {
            watch::watch(&client, interval, count).await?;
        }
        Commands::Health => {
            health::show_health(&client, cli.format).await?;
        }
    }

    Ok(())
}
