pub mod config;
pub mod doctor;

use clap::{Parser, Subcommand};

/// relayd — a daemon mediating interactive conversations between clients
/// and an LLM agent subprocess.
#[derive(Debug, Parser)]
#[command(name = "relayd", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the daemon (default when no subcommand is given).
    Serve,
    /// Run diagnostic checks against the current configuration.
    Doctor,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

/// Load config from `RELAYD_CONFIG` (default `config.toml`), falling back
/// to `Config::default()` when the file doesn't exist.
pub fn load_config() -> anyhow::Result<(rl_domain::config::Config, String)> {
    let config_path = std::env::var("RELAYD_CONFIG").unwrap_or_else(|_| "config.toml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        rl_domain::config::Config::default()
    };

    Ok((config, config_path))
}
