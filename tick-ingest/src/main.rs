//! Tick ingestion CLI
//!
//! Provides commands for:
//! - `run`: Stream trades into the tick log and batch them into storage (default)
//! - `init-db`: Create the storage schema
//! - `check`: Validate configuration and reach the log store

use anyhow::Result;
use clap::Parser;
use tick_common::logging::{init_logging, LogConfig};

use tick_ingest::cli::{self, Cli, Commands};
use tick_ingest::config::Settings;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Initialize logging
    init_logging(LogConfig::from_env().with_app_name("tick-ingest"))
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    // Parse CLI arguments
    let cli = Cli::parse();
    let settings = Settings::load()?;

    // Execute command
    match cli.command.unwrap_or(Commands::Run(Default::default())) {
        Commands::Run(args) => cli::run::execute(args, settings).await?,
        Commands::InitDb => cli::db::execute_init(&settings).await?,
        Commands::Check => cli::check::execute(&settings).await?,
    }

    Ok(())
}
