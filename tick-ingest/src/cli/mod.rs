//! Command-line interface
//!
//! Provides CLI commands for the ingestion service.

pub mod check;
pub mod db;
pub mod run;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tick_common::error::retry_with_backoff;
use tracing::info;

use crate::config::{Settings, SinkBackend, StreamBackend};
use crate::storage::{MemorySink, TickSink, TimescaleSink};
use crate::stream::{LogStore, MemoryLogStore, RedisLogStore};

const CONNECT_ATTEMPTS: u32 = 3;

/// Tick ingestion CLI
#[derive(Parser)]
#[command(name = "tick-ingest")]
#[command(about = "Exchange trade feed ingestion into a durable log and TimescaleDB")]
#[command(version)]
pub struct Cli {
    /// Subcommand to run (defaults to `run`)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the ingestion pipeline until Ctrl+C
    Run(run::RunArgs),
    /// Create the ticks table and hypertable
    InitDb,
    /// Validate configuration and check the log store
    Check,
}

/// Open the configured log store
pub async fn build_store(settings: &Settings) -> Result<Arc<dyn LogStore>> {
    let store: Arc<dyn LogStore> = match settings.stream.backend {
        StreamBackend::Redis => Arc::new(
            retry_with_backoff(
                || {
                    RedisLogStore::connect(
                        &settings.stream.redis_url,
                        settings.stream.approximate_trim,
                    )
                },
                CONNECT_ATTEMPTS,
                Duration::from_secs(1),
            )
            .await
            .context("Failed to connect to Redis")?,
        ),
        StreamBackend::Memory => Arc::new(MemoryLogStore::new()),
    };
    info!("Using {} log store", store.backend());
    Ok(store)
}

/// Open the configured storage sink
pub async fn build_sink(settings: &Settings) -> Result<Arc<dyn TickSink>> {
    let sink: Arc<dyn TickSink> = match settings.sink.backend {
        SinkBackend::Timescale => Arc::new(
            retry_with_backoff(
                || TimescaleSink::connect(&settings.database),
                CONNECT_ATTEMPTS,
                Duration::from_secs(1),
            )
            .await
            .context("Failed to connect to database")?,
        ),
        SinkBackend::Memory => Arc::new(MemorySink::new()),
    };
    info!("Using {} sink", sink.name());
    Ok(sink)
}
