//! Config command - manage configuration

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;

use crate::config::{Config, CONFIG_KEYS};
use crate::storage::db::default_db_path;

#[derive(clap::Args)]
#[command(after_help = "EXAMPLES:\n    \
    metgpt config                          Show all settings\n    \
    metgpt config get pro_model            Print one setting\n    \
    metgpt config set api_key AIza...      Store the Gemini API key\n    \
    metgpt config set orphan_policy recreate")]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<ConfigCommand>,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show,
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
}

pub fn run(args: Args) -> Result<()> {
    match args.command {
        Some(ConfigCommand::Show) | None => show_config(),
        Some(ConfigCommand::Get { key }) => {
            let config = Config::load()?;
            println!("{}", config.get(&key)?);
            Ok(())
        }
        Some(ConfigCommand::Set { key, value }) => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            println!("{} {} = {}", "Set".green(), key.cyan(), config.get(&key)?);
            Ok(())
        }
    }
}

fn show_config() -> Result<()> {
    let config = Config::load()?;

    println!("{}", "MetGPT Configuration".bold());
    println!();
    println!("  {}  {}", "File:".dimmed(), Config::config_path()?.display());
    println!("  {}  {}", "Database:".dimmed(), default_db_path()?.display());
    println!();

    for key in CONFIG_KEYS {
        println!("  {:18} {}", format!("{key}:").dimmed(), config.get(key)?);
    }

    if config.api_key.is_none() && config.resolved_api_key().is_some() {
        println!();
        println!("{}", "API key taken from the environment.".dimmed());
    }

    Ok(())
}
