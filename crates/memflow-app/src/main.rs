//! memflow binary: configuration and simulation entry point.
//!
//! 1. Parse CLI arguments
//! 2. Load configuration from TOML
//! 3. Initialise tracing (RUST_LOG overrides the configured level)
//! 4. Run the requested subcommand

mod cli;
mod simulate;

use clap::Parser;

use memflow_core::config::MemflowConfig;
use memflow_core::logging::init_tracing;

use crate::cli::{CliArgs, Command};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let config_file = args.resolve_config_path();
    let config = MemflowConfig::load_or_default(&config_file);

    init_tracing(&args.resolve_log_level(&config.general.log_level))?;
    tracing::info!("Starting memflow v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration resolved");

    match args.command {
        Command::Simulate(sim) => {
            let report = tokio::task::spawn_blocking(move || simulate::run(&config, &sim)).await??;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Config { write } => {
            print!("{}", config.to_toml_string()?);
            if write {
                config.save(&config_file)?;
                tracing::info!(path = %config_file.display(), "Configuration written");
            }
        }
    }

    Ok(())
}
