//! Run command - start the ingestion pipeline

use anyhow::Result;
use clap::Args;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::{build_sink, build_store};
use crate::config::{parse_symbols, Settings};
use crate::exchange::WsTransport;
use crate::metrics;
use crate::service::IngestionService;

/// Arguments for the run command
#[derive(Args, Default)]
pub struct RunArgs {
    /// Symbols to subscribe to (comma-separated), overrides configuration
    #[arg(long, short)]
    pub symbols: Option<String>,
}

/// Execute the run command
pub async fn execute(args: RunArgs, mut settings: Settings) -> Result<()> {
    if let Some(symbols) = args.symbols.as_deref() {
        settings.feed.symbols = parse_symbols(symbols);
    }
    settings.validate()?;

    if let Err(e) = metrics::register_metrics() {
        warn!("Failed to register metrics: {}", e);
    }

    let store = build_store(&settings).await?;
    let sink = build_sink(&settings).await?;
    let service = IngestionService::new(&settings, store, sink, Arc::new(WsTransport::new()))?;

    // Handle Ctrl+C
    let shutdown_tx = service.shutdown_handle();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl+c: {}", e);
            return;
        }
        info!("Received shutdown signal");
        let _ = shutdown_tx.send(());
    });

    service.run().await?;

    match metrics::encode_metrics() {
        Ok(text) => info!("Final metrics:\n{}", text),
        Err(e) => warn!("Failed to encode metrics: {}", e),
    }
    Ok(())
}
