//! Command-line interface and config loading.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use cs_domain::config::{Config, ConfigSeverity};

#[derive(Debug, Parser)]
#[command(name = "coachscribe", about = "Coaching-session transcription service")]
pub struct Cli {
    /// Path to the TOML config file. Defaults to `coachscribe.toml` in the
    /// working directory; a missing default file boots with defaults.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the gateway (default).
    Serve,
    /// Inspect or validate the configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print the version.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    Validate,
    Show,
}

/// Load the config file. A missing explicit path is an error; a missing
/// default path falls back to built-in defaults.
pub fn load_config(path: Option<&PathBuf>) -> anyhow::Result<(Config, PathBuf)> {
    let (path, required) = match path {
        Some(p) => (p.clone(), true),
        None => (PathBuf::from("coachscribe.toml"), false),
    };

    if !path.exists() {
        if required {
            anyhow::bail!("config file not found: {}", path.display());
        }
        return Ok((Config::default(), path));
    }

    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    let config: Config =
        toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    Ok((config, path))
}

/// Print issues; returns false when any error-severity issue exists.
pub fn validate(config: &Config, path: &std::path::Path) -> bool {
    let issues = config.validate();
    if issues.is_empty() {
        println!("{}: ok", path.display());
        return true;
    }
    let mut valid = true;
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => println!("warning: {issue}"),
            ConfigSeverity::Error => {
                println!("error: {issue}");
                valid = false;
            }
        }
    }
    valid
}

pub fn show(config: &Config) {
    match toml::to_string_pretty(config) {
        Ok(rendered) => println!("{rendered}"),
        Err(e) => println!("could not render config: {e}"),
    }
}
