use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tokio::{select, spawn};
use tracing::{debug, error, info, warn};

use super::{AckMode, BatchConfig, BatchStats, ServiceError, ServiceResult};
use crate::metrics;
use crate::storage::{SinkError, TickSink};
use crate::stream::{LogStore, StoreResult};
use tick_common::error::ErrorClassification;
use tick_common::{EntryId, LogEntry, Tick};

const DEFAULT_PAUSE: Duration = Duration::from_millis(500);

/// Consumes the tick log through a consumer group and writes ticks to the
/// sink in batches, flushing on size or on age, whichever comes first.
pub struct BatchAccumulator {
    inner: Arc<Inner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

struct Inner {
    store: Arc<dyn LogStore>,
    sink: Arc<dyn TickSink>,
    config: BatchConfig,
    /// Ticks read but not yet written, in log order
    buffer: Mutex<Vec<(EntryId, Tick)>>,
    last_flush: Mutex<Instant>,
    /// Serializes flushes; held across the sink call
    flush_lock: tokio::sync::Mutex<()>,
    stats: Mutex<BatchStats>,
    running: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
}

impl BatchAccumulator {
    pub fn new(store: Arc<dyn LogStore>, sink: Arc<dyn TickSink>, config: BatchConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(4);

        Self {
            inner: Arc::new(Inner {
                store,
                sink,
                config,
                buffer: Mutex::new(Vec::new()),
                last_flush: Mutex::new(Instant::now()),
                flush_lock: tokio::sync::Mutex::new(()),
                stats: Mutex::new(BatchStats::default()),
                running: AtomicBool::new(false),
                shutdown_tx,
            }),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.inner.config
    }

    /// Create the consumer group, replay this consumer's pending entries and
    /// spawn the consume, flush-timer and stats loops.
    pub async fn start(&self) -> ServiceResult<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(ServiceError::AlreadyRunning);
        }

        let config = &self.inner.config;
        info!(
            "Starting batch accumulator on '{}' as {}/{} (batch size {}, timeout {:?}, ack {:?})",
            config.log_name,
            config.group,
            config.consumer,
            config.batch_size,
            config.timeout,
            config.ack_mode
        );

        let prepared = async {
            self.inner
                .store
                .ensure_group(&config.log_name, &config.group)
                .await?;
            if config.ack_mode == AckMode::AfterFlush {
                self.inner.recover_pending().await?;
            }
            Ok::<(), ServiceError>(())
        }
        .await;

        if let Err(e) = prepared {
            self.inner.running.store(false, Ordering::SeqCst);
            return Err(e);
        }
        if !self.inner.is_running() {
            // Stopped while recovering
            return Ok(());
        }

        *self.inner.last_flush.lock() = Instant::now();

        let mut tasks = self.tasks.lock();
        tasks.push(spawn(Arc::clone(&self.inner).consume_loop()));
        tasks.push(spawn(Arc::clone(&self.inner).flush_timer_loop()));
        tasks.push(spawn(Arc::clone(&self.inner).stats_loop()));
        Ok(())
    }

    /// One read from the log into the buffer. Returns the number of ticks buffered.
    pub async fn consume_once(&self) -> StoreResult<usize> {
        self.inner.consume_once().await
    }

    /// Write out everything buffered. On failure the ticks go back to the
    /// front of the buffer in their original order.
    pub async fn flush(&self) -> Result<usize, SinkError> {
        self.inner.flush().await
    }

    /// Stop the loops and flush what is left
    pub async fn stop(&self) -> ServiceResult<()> {
        if self.inner.running.swap(false, Ordering::SeqCst) {
            info!("Stopping batch accumulator...");
            let _ = self.inner.shutdown_tx.send(());
        }

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Accumulator task ended abnormally: {}", e);
            }
        }

        if self.buffered() > 0 {
            info!("Final flush of {} buffered ticks", self.buffered());
            if let Err(e) = self.inner.flush().await {
                error!("Final flush failed: {}", e);
                return Err(e.into());
            }
        }

        self.inner.log_stats();
        info!("Batch accumulator stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> BatchStats {
        self.inner.stats.lock().clone()
    }

    pub fn buffered(&self) -> usize {
        self.inner.buffer.lock().len()
    }
}

impl Inner {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Sleep unless a stop arrives first
    async fn pause(&self, delay: Duration, shutdown_rx: &mut broadcast::Receiver<()>) {
        select! {
            _ = sleep(delay) => {}
            _ = shutdown_rx.recv() => {}
        }
    }

    async fn consume_loop(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut paused = false;

        while self.is_running() {
            let buffered = self.buffer.lock().len();

            if buffered >= self.config.max_buffer_ticks {
                if !paused {
                    warn!(
                        "Buffer holds {} ticks (limit {}), pausing reads until a flush succeeds",
                        buffered, self.config.max_buffer_ticks
                    );
                    paused = true;
                }
                if let Err(e) = self.flush().await {
                    self.pause(
                        e.suggested_retry_delay().unwrap_or(DEFAULT_PAUSE),
                        &mut shutdown_rx,
                    )
                    .await;
                }
                continue;
            }
            if paused {
                info!("Buffer back to {} ticks, resuming reads", buffered);
                paused = false;
            }

            match self.consume_once().await {
                Ok(_) => {
                    if self.buffer.lock().len() >= self.config.batch_size {
                        debug!("Size-based batch flush triggered");
                        if let Err(e) = self.flush().await {
                            self.pause(
                                e.suggested_retry_delay().unwrap_or(DEFAULT_PAUSE),
                                &mut shutdown_rx,
                            )
                            .await;
                        }
                    }
                }
                Err(e) => {
                    self.stats.lock().read_errors += 1;
                    metrics::LOG_READ_ERRORS_TOTAL.inc();
                    error!("Failed to read from '{}': {}", self.config.log_name, e);
                    self.pause(
                        e.suggested_retry_delay().unwrap_or(DEFAULT_PAUSE),
                        &mut shutdown_rx,
                    )
                    .await;
                }
            }
        }

        info!("Consume loop stopped");
    }

    async fn flush_timer_loop(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut flush_timer = interval(self.config.timeout);
        flush_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while self.is_running() {
            select! {
                _ = flush_timer.tick() => {
                    let due = self.last_flush.lock().elapsed() >= self.config.timeout;
                    if due && !self.buffer.lock().is_empty() {
                        debug!("Time-based batch flush triggered");
                        // Failures are retried on the next tick
                        let _ = self.flush().await;
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }

        debug!("Flush timer stopped");
    }

    async fn stats_loop(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut stats_timer = interval(self.config.stats_interval);
        stats_timer.tick().await;

        while self.is_running() {
            select! {
                _ = stats_timer.tick() => self.log_stats(),
                _ = shutdown_rx.recv() => break,
            }
        }
    }

    fn log_stats(&self) {
        let stats = self.stats.lock().clone();
        let buffered = self.buffer.lock().len();
        info!(
            "Accumulator: {} batches | {} inserted | {} read | {} flush errors | {} read errors | buffer {}/{}",
            stats.batches_processed,
            stats.ticks_inserted,
            stats.ticks_read,
            stats.errors,
            stats.read_errors,
            buffered,
            self.config.batch_size
        );
    }

    async fn consume_once(&self) -> StoreResult<usize> {
        let entries = self
            .store
            .read(
                &self.config.log_name,
                &self.config.group,
                &self.config.consumer,
                self.config.read_count,
                self.config.read_block,
            )
            .await?;

        Ok(self.buffer_entries(entries, false).await)
    }

    /// Replay entries delivered to this consumer but never acknowledged
    async fn recover_pending(&self) -> StoreResult<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut after = EntryId::ZERO;
        let mut recovered = 0;

        loop {
            if !self.drain_to_high_water(&mut shutdown_rx).await {
                info!("Recovery interrupted by stop, remaining entries stay pending");
                break;
            }

            let entries = self
                .store
                .read_pending(
                    &self.config.log_name,
                    &self.config.group,
                    &self.config.consumer,
                    self.config.read_count,
                    after,
                )
                .await?;
            let Some(last) = entries.last() else { break };
            after = last.id;

            recovered += self.buffer_entries(entries, true).await;

            if self.buffer.lock().len() >= self.config.batch_size {
                if let Err(e) = self.flush().await {
                    warn!("Flush during recovery failed, keeping ticks buffered: {}", e);
                }
            }
        }

        if recovered > 0 {
            info!(
                "Recovered {} pending ticks for {}/{}",
                recovered, self.config.group, self.config.consumer
            );
        }
        Ok(())
    }

    /// Flush until the buffer is below `max_buffer_ticks`. False when a stop
    /// arrived first.
    async fn drain_to_high_water(&self, shutdown_rx: &mut broadcast::Receiver<()>) -> bool {
        let mut warned = false;
        loop {
            if !self.is_running() {
                return false;
            }
            let buffered = self.buffer.lock().len();
            if buffered < self.config.max_buffer_ticks {
                return true;
            }
            if !warned {
                warn!(
                    "Buffer holds {} ticks (limit {}) during recovery, waiting for a flush",
                    buffered, self.config.max_buffer_ticks
                );
                warned = true;
            }
            if let Err(e) = self.flush().await {
                self.pause(e.suggested_retry_delay().unwrap_or(DEFAULT_PAUSE), shutdown_rx)
                    .await;
            }
        }
    }

    /// Decode and buffer entries. Undecodable entries are acknowledged right
    /// away; with on-read acknowledgment so is everything else.
    async fn buffer_entries(&self, entries: Vec<LogEntry>, recovered: bool) -> usize {
        if entries.is_empty() {
            return 0;
        }

        let mut decoded = Vec::with_capacity(entries.len());
        let mut to_ack = Vec::new();
        let mut malformed = 0u64;

        for entry in entries {
            match entry.tick() {
                Ok(tick) => {
                    if self.config.ack_mode == AckMode::OnRead {
                        to_ack.push(entry.id);
                    }
                    decoded.push((entry.id, tick));
                }
                Err(e) => {
                    warn!("Skipping undecodable entry {}: {}", entry.id, e);
                    malformed += 1;
                    to_ack.push(entry.id);
                }
            }
        }

        let count = decoded.len();
        let size = {
            let mut buffer = self.buffer.lock();
            buffer.extend(decoded);
            buffer.len()
        };
        metrics::BATCH_BUFFER_SIZE.set(size as i64);

        {
            let mut stats = self.stats.lock();
            stats.ticks_read += count as u64;
            stats.malformed_entries += malformed;
            if recovered {
                stats.recovered += count as u64;
            }
        }

        self.ack(&to_ack).await;
        count
    }

    async fn ack(&self, ids: &[EntryId]) {
        if ids.is_empty() {
            return;
        }
        match self
            .store
            .ack(&self.config.log_name, &self.config.group, ids)
            .await
        {
            Ok(n) => self.stats.lock().acked += n as u64,
            // Unacknowledged entries stay pending and are replayed on restart
            Err(e) => warn!("Failed to acknowledge {} entries: {}", ids.len(), e),
        }
    }

    async fn flush(&self) -> Result<usize, SinkError> {
        let _guard = self.flush_lock.lock().await;

        let snapshot = std::mem::take(&mut *self.buffer.lock());
        if snapshot.is_empty() {
            return Ok(0);
        }

        let ticks: Vec<Tick> = snapshot.iter().map(|(_, tick)| tick.clone()).collect();
        match self.sink.bulk_insert(&ticks).await {
            Ok(inserted) => {
                {
                    let mut stats = self.stats.lock();
                    stats.batches_processed += 1;
                    stats.ticks_inserted += ticks.len() as u64;
                    stats.last_flush_time = Some(chrono::Utc::now());
                }
                *self.last_flush.lock() = Instant::now();
                metrics::BATCHES_FLUSHED_TOTAL.inc();
                metrics::TICKS_INSERTED_TOTAL.inc_by(ticks.len() as u64);
                metrics::BATCH_BUFFER_SIZE.set(self.buffer.lock().len() as i64);

                info!(
                    "Flushed batch of {} ticks to {} ({} new)",
                    ticks.len(),
                    self.sink.name(),
                    inserted
                );

                if self.config.ack_mode == AckMode::AfterFlush {
                    let ids: Vec<EntryId> = snapshot.iter().map(|(id, _)| *id).collect();
                    self.ack(&ids).await;
                }
                Ok(inserted)
            }
            Err(e) => {
                {
                    let mut buffer = self.buffer.lock();
                    let newer = std::mem::replace(&mut *buffer, snapshot);
                    buffer.extend(newer);
                }
                self.stats.lock().errors += 1;
                metrics::BATCHES_FAILED_TOTAL.inc();
                error!(
                    "Batch insert of {} ticks failed, keeping them buffered: {}",
                    ticks.len(),
                    e
                );
                Err(e)
            }
        }
    }
}
