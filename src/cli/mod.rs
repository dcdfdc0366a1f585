use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

use crate::config::Config;

#[derive(Parser)]
#[command(name = "pastebridge")]
#[command(about = "Distributed clipboard paste-data synchronization service")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Configuration management")]
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    #[command(about = "Show version and build information")]
    Version,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    #[command(about = "Show current configuration")]
    Show,

    #[command(about = "Write a default configuration file")]
    Init {
        #[arg(long)]
        force: bool,
    },

    #[command(about = "Validate the configuration file")]
    Validate,
}

pub struct CliHandler {
    config: Config,
    config_path: Option<PathBuf>,
}

impl CliHandler {
    pub fn new(config_path: Option<PathBuf>) -> Result<Self> {
        let config = match &config_path {
            Some(path) => Config::load_from_path(path)?,
            None => Config::load()?,
        };
        Ok(Self {
            config,
            config_path,
        })
    }

    pub async fn handle_command(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Config { action } => self.handle_config_action(action),
            Commands::Version => self.show_version(),
        }
    }

    fn show_version(&self) -> Result<()> {
        println!(
            "pastebridge {} ({}, built {})",
            env!("CARGO_PKG_VERSION"),
            env!("BUILD_TARGET"),
            env!("BUILD_DATE")
        );
        println!(
            "  device: {} ({})",
            self.config.device.device_name, self.config.device.device_id
        );
        println!("  account: {}", self.config.device.account);
        Ok(())
    }

    fn handle_config_action(&self, action: ConfigAction) -> Result<()> {
        match action {
            ConfigAction::Show => {
                println!("Current Configuration:");
                println!("{:#?}", self.config);
            }
            ConfigAction::Init { force } => {
                if !force {
                    if let Some(path) = Config::default_path() {
                        if path.exists() {
                            bail!(
                                "configuration already exists at {} (use --force to overwrite)",
                                path.display()
                            );
                        }
                    }
                }
                let path = Config::default().save()?;
                println!("Wrote default configuration to {}", path.display());
            }
            ConfigAction::Validate => {
                match &self.config_path {
                    Some(path) => Config::validate(path)?,
                    // Already parsed and validated during load
                    None => self.config.validate_config()?,
                }
                println!("Configuration is valid");
            }
        }
        Ok(())
    }
}
