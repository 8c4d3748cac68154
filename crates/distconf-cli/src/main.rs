//! Command-line tooling for the distributed config keeper
//!
//! Runs keeper clusters either in the deterministic simulator or as real
//! async runtimes connected in memory, and prints the resulting tree and
//! configuration state.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

use commands::{
    config::{load_keeper_config, print_default_config},
    local::{handle_local_command, LocalCommand},
    simulate::{handle_simulate_command, SimulateCommand},
};

#[derive(Parser)]
#[command(name = "distconf")]
#[command(about = "Distributed config keeper - cluster simulation and diagnostics", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Keeper config file (TOML); `DISTCONF_*` variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a cluster in the deterministic simulator
    Simulate(SimulateCommand),
    /// Run a cluster of async keeper runtimes in this process
    Local(LocalCommand),
    /// Print the default keeper configuration
    DefaultConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Simulate(cmd) => {
            let config = load_keeper_config(cli.config.as_deref())?;
            handle_simulate_command(cmd, config)?;
        }
        Commands::Local(cmd) => {
            let config = load_keeper_config(cli.config.as_deref())?;
            handle_local_command(cmd, config).await?;
        }
        Commands::DefaultConfig => print_default_config()?,
    }

    Ok(())
}
