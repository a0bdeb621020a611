// exchange/supervisor.rs
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{info, warn};

use super::connector::{ConnectionState, ConnectorConfig, FeedCounters, FeedStats, SymbolFeed};
use super::errors::FeedError;
use super::normalizer::validate_symbol;
use super::transport::FeedTransport;
use crate::stream::TickPublisher;

struct FeedHandle {
    shutdown_tx: broadcast::Sender<()>,
    state_rx: watch::Receiver<ConnectionState>,
    task: JoinHandle<()>,
}

struct StatsReporter {
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

/// Owns one connector task per symbol
pub struct FeedSupervisor {
    transport: Arc<dyn FeedTransport>,
    publisher: Arc<TickPublisher>,
    config: ConnectorConfig,
    counters: Arc<FeedCounters>,
    feeds: Mutex<HashMap<String, FeedHandle>>,
    reporter: Mutex<Option<StatsReporter>>,
    last_report: Arc<Mutex<Option<FeedStats>>>,
}

impl FeedSupervisor {
    pub fn new(
        transport: Arc<dyn FeedTransport>,
        publisher: Arc<TickPublisher>,
        config: ConnectorConfig,
    ) -> Self {
        Self {
            transport,
            publisher,
            config,
            counters: Arc::new(FeedCounters::default()),
            feeds: Mutex::new(HashMap::new()),
            reporter: Mutex::new(None),
            last_report: Arc::new(Mutex::new(None)),
        }
    }

    /// Start connectors for every symbol; invalid symbols fail the whole call
    pub fn start(&self, symbols: &[String]) -> Result<(), FeedError> {
        let validated = symbols
            .iter()
            .map(|s| validate_symbol(s))
            .collect::<Result<Vec<_>, _>>()?;

        for symbol in validated {
            self.add_symbol(&symbol)?;
        }
        info!("Feed supervisor running {} symbol(s)", self.feeds.lock().len());
        Ok(())
    }

    /// Start a connector for `symbol`. Returns false when it is already running.
    pub fn add_symbol(&self, symbol: &str) -> Result<bool, FeedError> {
        let symbol = validate_symbol(symbol)?;
        let mut feeds = self.feeds.lock();
        if feeds.contains_key(&symbol) {
            warn!("Feed for {} is already running", symbol);
            return Ok(false);
        }

        let feed = SymbolFeed::new(
            &symbol,
            Arc::clone(&self.transport),
            Arc::clone(&self.publisher),
            self.config.clone(),
            Arc::clone(&self.counters),
        )?;
        let state_rx = feed.state_receiver();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(feed.run(shutdown_rx));

        feeds.insert(
            symbol,
            FeedHandle {
                shutdown_tx,
                state_rx,
                task,
            },
        );
        Ok(true)
    }

    /// Stop the connector for `symbol`. Returns false when none was running.
    pub async fn remove_symbol(&self, symbol: &str) -> bool {
        let symbol = symbol.trim().to_lowercase();
        let handle = self.feeds.lock().remove(&symbol);
        match handle {
            Some(handle) => {
                Self::shutdown(&symbol, handle).await;
                true
            }
            None => false,
        }
    }

    /// Log the aggregate feed counters every `period` until [`FeedSupervisor::stop`]
    pub fn start_stats_reporter(&self, period: Duration) {
        let mut reporter = self.reporter.lock();
        if reporter.is_some() {
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let counters = Arc::clone(&self.counters);
        let last_report = Arc::clone(&self.last_report);

        let task = tokio::spawn(async move {
            let mut timer = interval(period);
            timer.tick().await;

            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        let stats = counters.snapshot();
                        info!(
                            "Feeds: {} received | {} published | {} malformed | {} ignored | {} publish errors | {} reconnects",
                            stats.received,
                            stats.published,
                            stats.malformed,
                            stats.ignored,
                            stats.publish_errors,
                            stats.reconnects
                        );
                        *last_report.lock() = Some(stats);
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        *reporter = Some(StatsReporter { shutdown_tx, task });
    }

    /// Counters as of the most recent periodic report
    pub fn last_report(&self) -> Option<FeedStats> {
        self.last_report.lock().clone()
    }

    /// Stop every connector and the stats reporter, and wait for them to exit
    pub async fn stop(&self) {
        let reporter = self.reporter.lock().take();
        if let Some(reporter) = reporter {
            let _ = reporter.shutdown_tx.send(());
            if let Err(e) = reporter.task.await {
                warn!("Feed stats reporter ended abnormally: {}", e);
            }
        }

        let handles: Vec<_> = self.feeds.lock().drain().collect();
        if handles.is_empty() {
            return;
        }
        info!("Stopping {} feed(s)...", handles.len());

        for (_, handle) in &handles {
            let _ = handle.shutdown_tx.send(());
        }
        for (symbol, handle) in handles {
            if let Err(e) = handle.task.await {
                warn!("Feed task for {} ended abnormally: {}", symbol, e);
            }
        }
        info!("All feeds stopped");
    }

    async fn shutdown(symbol: &str, handle: FeedHandle) {
        let _ = handle.shutdown_tx.send(());
        if let Err(e) = handle.task.await {
            warn!("Feed task for {} ended abnormally: {}", symbol, e);
        }
        info!("Feed for {} removed", symbol);
    }

    pub fn active_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<_> = self.feeds.lock().keys().cloned().collect();
        symbols.sort();
        symbols
    }

    pub fn state(&self, symbol: &str) -> Option<ConnectionState> {
        self.feeds
            .lock()
            .get(&symbol.to_lowercase())
            .map(|h| *h.state_rx.borrow())
    }

    pub fn watch_state(&self, symbol: &str) -> Option<watch::Receiver<ConnectionState>> {
        self.feeds
            .lock()
            .get(&symbol.to_lowercase())
            .map(|h| h.state_rx.clone())
    }

    pub fn stats(&self) -> FeedStats {
        self.counters.snapshot()
    }
}
