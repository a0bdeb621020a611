//! Database management commands

use anyhow::Result;
use tracing::info;

use crate::config::Settings;
use crate::storage::{TickSink, TimescaleSink};

/// Create the ticks table, hypertable and index
pub async fn execute_init(settings: &Settings) -> Result<()> {
    let sink = TimescaleSink::connect(&settings.database).await?;

    info!("Initializing database schema...");
    sink.ensure_schema().await?;

    info!("Database ready");
    Ok(())
}
