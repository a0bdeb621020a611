//! Check command - validate configuration and reach the log store

use anyhow::{Context, Result};
use tracing::info;

use super::build_store;
use crate::config::Settings;

pub async fn execute(settings: &Settings) -> Result<()> {
    settings.validate().context("Invalid configuration")?;
    info!("Configuration OK");
    info!("  Symbols: {:?}", settings.feed.symbols);
    info!("  Feed: {}", settings.feed.ws_url);
    info!(
        "  Log: '{}' (max {} entries, groups {:?})",
        settings.stream.name,
        settings.stream.max_len,
        settings.stream.groups.all()
    );
    info!(
        "  Batch: {} ticks / {}s, ack {:?}",
        settings.batch.size, settings.batch.timeout_secs, settings.batch.ack_mode
    );

    let store = build_store(settings).await?;
    store.ping().await.context("Log store is unreachable")?;
    let len = store.len(&settings.stream.name).await?;
    info!("Log store reachable, '{}' holds {} entries", settings.stream.name, len);
    Ok(())
}
