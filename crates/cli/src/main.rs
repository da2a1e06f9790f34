//! netbed CLI - Main Entry Point
//!
//! Operator tooling around the provisioning engine: configuration
//! inspection, resource schemas and forwarder shared-memory diagnostics.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod output;

use commands::{config, memif, schema};

/// netbed - virtual network testbed provisioning
#[derive(Parser)]
#[command(name = "netbed")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Engine configuration file
    #[arg(long, env = "NETBED_CONFIG", default_value = "netbed.toml", global = true)]
    config: PathBuf,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect or create the engine configuration
    #[command(subcommand)]
    Config(config::ConfigCommands),

    /// Show the attributes of a resource kind
    #[command(subcommand)]
    Schema(schema::SchemaCommands),

    /// Shared-memory interface diagnostics
    #[command(subcommand)]
    Memif(memif::MemifCommands),

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Config(cmd) => config::execute(cmd, &cli.config, cli.format)?,
        Commands::Schema(cmd) => schema::execute(cmd, &cli.config, cli.format)?,
        Commands::Memif(cmd) => memif::execute(cmd, &cli.config, cli.format).await?,
        Commands::Version => {
            println!("netbed v{}", netbed_common::VERSION);
        }
    }

    Ok(())
}
