//! proofwork - tamper-evident tracking of AI-assisted coding sessions
//!
#![doc = "Main entry point for the proofwork daemon and CLI."]

use anyhow::Result;
use clap::Parser;

use proofwork::cli::{Cli, Commands};
use proofwork::commands;
use proofwork::config::{default_config_path, Config};
use proofwork::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Load configuration
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| default_config_path().to_string_lossy().into_owned());
    let config = Config::load(&config_path, &cli)?;

    // Validate configuration
    config.validate()?;

    init_logging(&config.logging)?;
    tracing::debug!(config = %config_path, "Configuration loaded");

    // Execute command
    match cli.command {
        Commands::Serve { .. } => commands::serve::run_serve(config).await,
        Commands::Score { json, .. } => commands::score::run_score(config, json),
        Commands::Verify { session_id } => commands::verify::run_verify(config, session_id),
    }
}
