//! CLI subcommand: `sudokey config`

use anyhow::Result;
use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::paths::Paths;

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show {
        /// Output format: toml (default) or json
        #[arg(short, long, default_value = "toml")]
        format: String,
    },

    /// Get a configuration value
    Get {
        /// Config key (e.g., policy.mode)
        key: String,
    },

    /// Set a configuration value
    Set {
        /// Config key (e.g., policy.mode)
        key: String,

        /// Value to set
        value: String,
    },

    /// Show config file path
    Path,

    /// Initialize default config file
    Init {
        /// Overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

pub fn run(args: ConfigArgs, paths: &Paths, explicit: Option<&Path>) -> Result<()> {
    match args.command {
        ConfigCommands::Show { format } => show_config(paths, explicit, &format),
        ConfigCommands::Get { key } => get_config(paths, explicit, &key),
        ConfigCommands::Set { key, value } => set_config(paths, explicit, &key, &value),
        ConfigCommands::Path => {
            println!("{}", config_path(paths, explicit).display());
            Ok(())
        }
        ConfigCommands::Init { force } => init_config(paths, explicit, force),
    }
}

fn config_path(paths: &Paths, explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| paths.config_file())
}

fn show_config(paths: &Paths, explicit: Option<&Path>, format: &str) -> Result<()> {
    let config = Config::load(paths, explicit)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&config)?),
        _ => println!("{}", toml::to_string_pretty(&config)?),
    }

    Ok(())
}

fn get_config(paths: &Paths, explicit: Option<&Path>, key: &str) -> Result<()> {
    let config = Config::load(paths, explicit)?;
    println!("{}", config.get_value(key)?);
    Ok(())
}

fn set_config(paths: &Paths, explicit: Option<&Path>, key: &str, value: &str) -> Result<()> {
    let mut config = Config::load(paths, explicit)?;
    config.set_value(key, value)?;
    config.save(&config_path(paths, explicit))?;
    println!("Set {} = {}", key, value);
    Ok(())
}

fn init_config(paths: &Paths, explicit: Option<&Path>, force: bool) -> Result<()> {
    let path = config_path(paths, explicit);

    if path.exists() && !force {
        anyhow::bail!(
            "Config file already exists at {}. Use --force to overwrite.",
            path.display()
        );
    }

    Config::save_template(&path)
}
