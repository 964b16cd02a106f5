//! # Battle Analytics CLI Binary
//!
//! Command-line interface for inspecting snapshot fixtures.

use anyhow::Result;
use battle_analytics::cli::{Cli, CliHandler};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Create CLI handler
    let handler = CliHandler::new(&cli).await?;

    // Handle command
    handler.handle_command(cli.command).await?;

    Ok(())
}
