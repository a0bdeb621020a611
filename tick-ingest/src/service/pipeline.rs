use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info};

use super::{BatchAccumulator, BatchStats, ServiceError, ServiceResult};
use crate::config::Settings;
use crate::exchange::{validate_symbol, FeedStats, FeedSupervisor, FeedTransport};
use crate::storage::TickSink;
use crate::stream::{LogStore, TickPublisher};

/// Feed connectors, tick log and batch accumulator wired together
pub struct IngestionService {
    store: Arc<dyn LogStore>,
    symbols: Vec<String>,
    log_name: String,
    groups: Vec<String>,
    supervisor: FeedSupervisor,
    accumulator: BatchAccumulator,
    stats_interval: Duration,
    shutdown_tx: broadcast::Sender<()>,
}

impl IngestionService {
    pub fn new(
        settings: &Settings,
        store: Arc<dyn LogStore>,
        sink: Arc<dyn TickSink>,
        transport: Arc<dyn FeedTransport>,
    ) -> ServiceResult<Self> {
        if settings.feed.symbols.is_empty() {
            return Err(ServiceError::Configuration(
                "No symbols configured".to_string(),
            ));
        }
        let symbols = settings
            .feed
            .symbols
            .iter()
            .map(|s| validate_symbol(s))
            .collect::<Result<Vec<_>, _>>()?;

        let publisher = Arc::new(TickPublisher::new(
            Arc::clone(&store),
            settings.stream.name.clone(),
            settings.stream.max_len,
        ));
        let supervisor = FeedSupervisor::new(transport, publisher, settings.connector_config());
        let accumulator =
            BatchAccumulator::new(Arc::clone(&store), sink, settings.batch_config());
        let (shutdown_tx, _) = broadcast::channel(16);

        Ok(Self {
            store,
            symbols,
            log_name: settings.stream.name.clone(),
            groups: settings.stream.groups.all(),
            supervisor,
            accumulator,
            stats_interval: Duration::from_secs(settings.batch.stats_interval_secs),
            shutdown_tx,
        })
    }

    /// Sender that stops [`IngestionService::run`]
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Check the log store, create the consumer groups, then start the
    /// accumulator and the feeds.
    pub async fn start(&self) -> ServiceResult<()> {
        info!(
            "Starting ingestion for {:?} into '{}' ({})",
            self.symbols,
            self.log_name,
            self.store.backend()
        );

        self.store.ping().await?;
        for group in &self.groups {
            self.store.ensure_group(&self.log_name, group).await?;
        }

        self.accumulator.start().await?;
        if let Err(e) = self.supervisor.start(&self.symbols) {
            self.supervisor.stop().await;
            if let Err(stop_err) = self.accumulator.stop().await {
                error!("Accumulator stop after failed start: {}", stop_err);
            }
            return Err(e.into());
        }
        self.supervisor.start_stats_reporter(self.stats_interval);

        info!("Ingestion pipeline running");
        Ok(())
    }

    /// Stop the feeds, then the accumulator (which flushes what is buffered)
    pub async fn stop(&self) -> ServiceResult<()> {
        info!("Stopping ingestion pipeline...");
        self.supervisor.stop().await;
        self.accumulator.stop().await?;

        let feed = self.supervisor.stats();
        let batch = self.accumulator.stats();
        info!(
            "Ingestion stopped: {} received, {} published, {} malformed | {} batches, {} ticks inserted",
            feed.received, feed.published, feed.malformed, batch.batches_processed, batch.ticks_inserted
        );
        Ok(())
    }

    /// Start, wait for the shutdown signal, stop
    pub async fn run(&self) -> ServiceResult<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        self.start().await?;

        let _ = shutdown_rx.recv().await;
        info!("Shutdown signal received");
        self.stop().await
    }

    pub fn supervisor(&self) -> &FeedSupervisor {
        &self.supervisor
    }

    pub fn accumulator(&self) -> &BatchAccumulator {
        &self.accumulator
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn feed_stats(&self) -> FeedStats {
        self.supervisor.stats()
    }

    pub fn batch_stats(&self) -> BatchStats {
        self.accumulator.stats()
    }
}
