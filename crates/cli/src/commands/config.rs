//! Configuration Commands

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use netbed_common::EngineConfig;
use std::path::{Path, PathBuf};

use crate::output::{print_success, OutputFormat};

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,

    /// Write a configuration file with every default filled in
    Init {
        /// Destination file
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub fn execute(cmd: ConfigCommands, config_path: &Path, format: OutputFormat) -> Result<()> {
    match cmd {
        ConfigCommands::Show => {
            let config = EngineConfig::load(config_path)
                .with_context(|| format!("loading {}", config_path.display()))?;
            match format {
                OutputFormat::Table => print!("{}", toml::to_string_pretty(&config)?),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
            }
        }

        ConfigCommands::Init { path, force } => {
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            EngineConfig::default()
                .save(&path)
                .with_context(|| format!("writing {}", path.display()))?;
            print_success(&format!("Configuration written to {}", path.display()));
        }
    }

    Ok(())
}
