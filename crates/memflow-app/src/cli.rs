//! CLI argument definitions for the memflow binary.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// memflow: action queue and event expiration driver.
#[derive(Parser, Debug)]
#[command(name = "memflow", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Insert a stream of events on the configured clock and report what expired.
    Simulate(SimulateArgs),
    /// Print the effective configuration as TOML.
    Config {
        /// Also write it to the resolved config path.
        #[arg(long)]
        write: bool,
    },
}

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Number of events to insert.
    #[arg(short = 'n', long, default_value_t = 10)]
    pub events: u32,

    /// Milliseconds between consecutive events.
    #[arg(long, default_value_t = 250)]
    pub step_ms: u64,

    /// Duration of each event's window, in milliseconds.
    #[arg(long, default_value_t = 0)]
    pub duration_ms: i64,

    /// Expiration offset of every target; -1 disables expiration.
    #[arg(long, default_value_t = 1_000, allow_hyphen_values = true)]
    pub offset_ms: i64,

    /// Number of targets interested in the event type.
    #[arg(long, default_value_t = 1)]
    pub targets: usize,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > MEMFLOW_CONFIG env var > ~/.memflow/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("MEMFLOW_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the log level.
    ///
    /// Priority: --log-level flag > config file value.
    pub fn resolve_log_level(&self, config_level: &str) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config_level.to_string())
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".memflow").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".memflow").join("config.toml");
    }
    PathBuf::from("config.toml")
}
