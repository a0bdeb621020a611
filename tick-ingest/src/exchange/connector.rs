// exchange/connector.rs
//
// One persistent trade-stream connection per symbol: keepalive on read
// timeout, reconnect with backoff, normalize and publish every frame.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use super::errors::FeedError;
use super::normalizer::{normalize_frame, trade_stream_url};
use super::rate_limiter::{ReconnectionRateLimiter, ReconnectionRateLimiterConfig};
use super::transport::{FeedConnection, FeedFrame, FeedTransport};
use crate::metrics;
use crate::stream::TickPublisher;

/// Observable connector state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
    /// The connector exited after a stop request
    Stopped,
}

/// Connector tuning shared by every symbol
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Feed base URL; the stream path `<symbol>@trade` is appended
    pub base_url: String,
    /// Silence tolerated before a keepalive ping
    pub read_timeout: Duration,
    /// First reconnect delay
    pub reconnect_delay: Duration,
    /// Upper bound for the exponential reconnect delay
    pub reconnect_max_delay: Duration,
    pub rate_limit: ReconnectionRateLimiterConfig,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            base_url: "wss://fstream.binance.com/ws".to_string(),
            read_timeout: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(5),
            reconnect_max_delay: Duration::from_secs(5),
            rate_limit: ReconnectionRateLimiterConfig::default(),
        }
    }
}

impl ConnectorConfig {
    /// `min(reconnect_delay * 2^attempt, reconnect_max_delay)`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(10));
        self.reconnect_delay
            .saturating_mul(factor)
            .min(self.reconnect_max_delay.max(self.reconnect_delay))
    }
}

// =================================================================
// Counters
// =================================================================

/// Feed counters shared by all connectors of a supervisor
#[derive(Debug, Default)]
pub struct FeedCounters {
    received: AtomicU64,
    published: AtomicU64,
    ignored: AtomicU64,
    malformed: AtomicU64,
    publish_errors: AtomicU64,
    connections: AtomicU64,
    reconnects: AtomicU64,
}

/// Point-in-time copy of [`FeedCounters`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedStats {
    /// Text frames received
    pub received: u64,
    /// Ticks appended to the log
    pub published: u64,
    /// Well-formed frames without a trade
    pub ignored: u64,
    /// Frames dropped as malformed
    pub malformed: u64,
    /// Ticks the log refused
    pub publish_errors: u64,
    /// Connection attempts
    pub connections: u64,
    /// Reconnect cycles
    pub reconnects: u64,
}

impl FeedCounters {
    pub fn snapshot(&self) -> FeedStats {
        FeedStats {
            received: self.received.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            publish_errors: self.publish_errors.load(Ordering::Relaxed),
            connections: self.connections.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

// =================================================================
// Symbol feed
// =================================================================

/// How a connected session ended
enum SessionEnd {
    Shutdown,
    Closed(String),
    Failed(FeedError),
}

/// Connector for a single symbol
pub struct SymbolFeed {
    symbol: String,
    url: String,
    transport: Arc<dyn FeedTransport>,
    publisher: Arc<TickPublisher>,
    config: ConnectorConfig,
    counters: Arc<FeedCounters>,
    limiter: ReconnectionRateLimiter,
    state_tx: watch::Sender<ConnectionState>,
}

impl SymbolFeed {
    pub fn new(
        symbol: &str,
        transport: Arc<dyn FeedTransport>,
        publisher: Arc<TickPublisher>,
        config: ConnectorConfig,
        counters: Arc<FeedCounters>,
    ) -> Result<Self, FeedError> {
        let url = trade_stream_url(&config.base_url, symbol)?;
        let limiter = ReconnectionRateLimiter::new(config.rate_limit.clone())?;
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        Ok(Self {
            symbol: symbol.to_lowercase(),
            url,
            transport,
            publisher,
            config,
            counters,
            limiter,
            state_tx,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Subscribe to state changes
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    /// Run until a stop signal arrives on `shutdown_rx`
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("Starting feed for {} at {}", self.symbol, self.url);
        let mut attempt: u32 = 0;

        loop {
            if stop_requested(&mut shutdown_rx) {
                break;
            }

            self.set_state(ConnectionState::Connecting);
            FeedCounters::bump(&self.counters.connections);
            metrics::WS_CONNECTIONS_TOTAL.inc();

            let connected = tokio::select! {
                result = self.transport.connect(&self.url) => result,
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received while connecting {}", self.symbol);
                    break;
                }
            };

            match connected {
                Ok(conn) => {
                    attempt = 0;
                    self.set_state(ConnectionState::Connected);
                    metrics::WS_ACTIVE_CONNECTIONS.inc();
                    info!("Feed connected for {}", self.symbol);

                    let end = self.process_session(conn, &mut shutdown_rx).await;
                    metrics::WS_ACTIVE_CONNECTIONS.dec();

                    match end {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Closed(reason) => {
                            info!("Feed for {} closed: {}", self.symbol, reason)
                        }
                        SessionEnd::Failed(e) => {
                            warn!("Feed for {} failed: {}", self.symbol, e)
                        }
                    }
                }
                Err(e) => {
                    error!("Feed connection for {} failed: {}", self.symbol, e);
                }
            }

            self.set_state(ConnectionState::Disconnected);
            FeedCounters::bump(&self.counters.reconnects);
            metrics::WS_RECONNECTS_TOTAL.inc();

            let mut delay = self.config.backoff_delay(attempt);
            attempt = attempt.saturating_add(1);
            if !self.limiter.check_allowed() {
                delay = delay.max(self.limiter.wait_duration());
                warn!(
                    "Reconnect storm on {} (more than {} attempts per window), backing off {:?}",
                    self.symbol,
                    self.limiter.max_attempts(),
                    delay
                );
            } else {
                warn!("Reconnecting {} in {:?}...", self.symbol, delay);
            }

            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received during reconnect delay for {}", self.symbol);
                    break;
                }
            }
        }

        self.set_state(ConnectionState::Stopped);
        info!("Feed for {} stopped", self.symbol);
    }

    async fn process_session(
        &self,
        mut conn: Box<dyn FeedConnection>,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> SessionEnd {
        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => {
                    self.set_state(ConnectionState::Closing);
                    if let Err(e) = conn.close().await {
                        warn!("Failed to send close frame for {}: {}", self.symbol, e);
                    }
                    return SessionEnd::Shutdown;
                }

                read = timeout(self.config.read_timeout, conn.next_frame()) => {
                    match read {
                        Err(_) => {
                            debug!(
                                "No data from {} for {:?}, sending keepalive ping",
                                self.symbol, self.config.read_timeout
                            );
                            if let Err(e) = conn.send_ping(Vec::new()).await {
                                return SessionEnd::Failed(e);
                            }
                        }
                        Ok(None) => return SessionEnd::Closed("stream ended".to_string()),
                        Ok(Some(Err(e))) => return SessionEnd::Failed(e),
                        Ok(Some(Ok(frame))) => match frame {
                            FeedFrame::Text(text) => self.handle_text(&text).await,
                            FeedFrame::Ping(payload) => {
                                if let Err(e) = conn.send_pong(payload).await {
                                    return SessionEnd::Failed(e);
                                }
                            }
                            FeedFrame::Close(reason) => {
                                return SessionEnd::Closed(
                                    reason.unwrap_or_else(|| "closed by server".to_string()),
                                );
                            }
                            FeedFrame::Pong | FeedFrame::Binary(_) => {}
                        },
                    }
                }
            }
        }
    }

    async fn handle_text(&self, text: &str) {
        FeedCounters::bump(&self.counters.received);
        metrics::FRAMES_RECEIVED_TOTAL.inc();

        match normalize_frame(text) {
            Ok(Some(tick)) => match self.publisher.publish(&tick).await {
                Ok(_) => FeedCounters::bump(&self.counters.published),
                Err(e) => {
                    FeedCounters::bump(&self.counters.publish_errors);
                    metrics::PUBLISH_ERRORS_TOTAL.inc();
                    error!("Failed to publish {} tick: {}", tick.symbol, e);
                }
            },
            Ok(None) => {
                FeedCounters::bump(&self.counters.ignored);
                metrics::FRAMES_IGNORED_TOTAL.inc();
                debug!("Ignoring non-trade frame on {}: {}", self.symbol, text);
            }
            Err(e) => {
                FeedCounters::bump(&self.counters.malformed);
                metrics::FRAMES_MALFORMED_TOTAL.inc();
                warn!("Dropping malformed frame on {}: {}", self.symbol, e);
            }
        }
    }
}

/// True once a stop was sent or every sender is gone
fn stop_requested(shutdown_rx: &mut broadcast::Receiver<()>) -> bool {
    !matches!(
        shutdown_rx.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::mock::{MockEvent, MockFeedTransport, MockSession};
    use crate::stream::{LogStore, MemoryLogStore};

    const LOG: &str = "ticks_stream";

    fn trade(price: &str, trade_time: i64) -> String {
        format!(
            r#"{{"e":"trade","E":{t},"s":"BTCUSDT","p":"{p}","q":"0.01","T":{t}}}"#,
            p = price,
            t = trade_time
        )
    }

    struct Harness {
        store: Arc<MemoryLogStore>,
        transport: Arc<MockFeedTransport>,
        counters: Arc<FeedCounters>,
        shutdown_tx: broadcast::Sender<()>,
        state_rx: watch::Receiver<ConnectionState>,
        task: tokio::task::JoinHandle<()>,
    }

    async fn start(sessions: Vec<MockSession>, config: ConnectorConfig) -> Harness {
        let store = Arc::new(MemoryLogStore::new());
        store.ensure_group(LOG, "g").await.unwrap();
        let publisher = Arc::new(TickPublisher::new(store.clone(), LOG, 1000));
        let transport = Arc::new(MockFeedTransport::new(sessions));
        let counters = Arc::new(FeedCounters::default());

        let feed = SymbolFeed::new(
            "btcusdt",
            transport.clone(),
            publisher,
            config,
            counters.clone(),
        )
        .unwrap();
        let state_rx = feed.state_receiver();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(4);
        let task = tokio::spawn(feed.run(shutdown_rx));

        Harness {
            store,
            transport,
            counters,
            shutdown_tx,
            state_rx,
            task,
        }
    }

    async fn published_prices(store: &MemoryLogStore) -> Vec<f64> {
        store
            .read(LOG, "g", "c1", 1000, Duration::ZERO)
            .await
            .unwrap()
            .iter()
            .map(|e| e.tick().unwrap().price)
            .collect()
    }

    async fn wait_for_state(rx: &mut watch::Receiver<ConnectionState>, want: ConnectionState) {
        timeout(Duration::from_secs(120), rx.wait_for(|s| *s == want))
            .await
            .expect("state not reached")
            .unwrap();
    }

    #[test]
    fn test_backoff_delay() {
        let fixed = ConnectorConfig::default();
        assert_eq!(fixed.backoff_delay(0), Duration::from_secs(5));
        assert_eq!(fixed.backoff_delay(7), Duration::from_secs(5));

        let exponential = ConnectorConfig {
            reconnect_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(30),
            ..Default::default()
        };
        assert_eq!(exponential.backoff_delay(0), Duration::from_secs(1));
        assert_eq!(exponential.backoff_delay(3), Duration::from_secs(8));
        assert_eq!(exponential.backoff_delay(10), Duration::from_secs(30));
        assert_eq!(exponential.backoff_delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_symbol_is_rejected() {
        let store: Arc<dyn LogStore> = Arc::new(MemoryLogStore::new());
        let result = SymbolFeed::new(
            "btc/usdt",
            Arc::new(MockFeedTransport::default()),
            Arc::new(TickPublisher::new(store, LOG, 10)),
            ConnectorConfig::default(),
            Arc::new(FeedCounters::default()),
        );
        assert!(matches!(result, Err(FeedError::InvalidSymbol(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_are_published_in_order() {
        let session = MockSession::frames([
            trade("50000.0", 1_672_531_382_001),
            r#"{"result":null,"id":1}"#.to_string(),
            "garbage".to_string(),
            trade("50001.5", 1_672_531_382_002),
        ])
        .then_hold();
        let mut h = start(vec![session], ConnectorConfig::default()).await;

        wait_for_state(&mut h.state_rx, ConnectionState::Connected).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(published_prices(&h.store).await, vec![50000.0, 50001.5]);
        let stats = h.counters.snapshot();
        assert_eq!(stats.received, 4);
        assert_eq!(stats.published, 2);
        assert_eq!(stats.ignored, 1);
        assert_eq!(stats.malformed, 1);
        assert_eq!(
            stats.received,
            stats.published + stats.publish_errors + stats.ignored + stats.malformed
        );

        h.shutdown_tx.send(()).unwrap();
        h.task.await.unwrap();
        assert_eq!(*h.state_rx.borrow(), ConnectionState::Stopped);
        assert_eq!(h.transport.activity().closes_sent, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_timeout_sends_ping_instead_of_closing() {
        let config = ConnectorConfig {
            read_timeout: Duration::from_secs(30),
            ..Default::default()
        };
        let mut h = start(vec![MockSession::frames(Vec::<String>::new()).then_hold()], config).await;
        wait_for_state(&mut h.state_rx, ConnectionState::Connected).await;

        tokio::time::sleep(Duration::from_secs(95)).await;

        let activity = h.transport.activity();
        assert_eq!(activity.pings_sent, 3);
        assert_eq!(activity.connects.len(), 1, "timeouts must not reconnect");
        assert_eq!(*h.state_rx.borrow(), ConnectionState::Connected);

        h.shutdown_tx.send(()).unwrap();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_ping_is_answered() {
        let session = MockSession::events(vec![MockEvent::Ping]).then_hold();
        let mut h = start(vec![session], ConnectorConfig::default()).await;
        wait_for_state(&mut h.state_rx, ConnectionState::Connected).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(h.transport.activity().pongs_sent, 1);
        h.shutdown_tx.send(()).unwrap();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_after_error_does_not_reemit() {
        let sessions = vec![
            MockSession::events(vec![
                MockEvent::Text(trade("100.0", 1)),
                MockEvent::Text(trade("101.0", 2)),
                MockEvent::Error("connection reset".into()),
            ]),
            MockSession::refuse("still down"),
            MockSession::frames([trade("102.0", 3)]).then_hold(),
        ];
        let mut h = start(sessions, ConnectorConfig::default()).await;

        // Two reconnect delays of 5s each
        tokio::time::sleep(Duration::from_secs(11)).await;
        wait_for_state(&mut h.state_rx, ConnectionState::Connected).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(published_prices(&h.store).await, vec![100.0, 101.0, 102.0]);
        let stats = h.counters.snapshot();
        assert_eq!(stats.connections, 3);
        assert_eq!(stats.reconnects, 2);
        assert_eq!(h.transport.activity().connects.len(), 3);
        assert!(h
            .transport
            .activity()
            .connects
            .iter()
            .all(|u| u == "wss://fstream.binance.com/ws/btcusdt@trade"));

        h.shutdown_tx.send(()).unwrap();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_waits_backoff_delay() {
        let sessions = vec![MockSession::refuse("down"), MockSession::refuse("down")];
        let h = start(sessions, ConnectorConfig::default()).await;

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(h.transport.activity().connects.len(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(h.transport.activity().connects.len(), 2);

        h.shutdown_tx.send(()).unwrap();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_reconnect_delay() {
        let h = start(vec![MockSession::refuse("down")], ConnectorConfig::default()).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.transport.activity().connects.len(), 1);
        assert_eq!(*h.state_rx.borrow(), ConnectionState::Disconnected);

        h.shutdown_tx.send(()).unwrap();
        timeout(Duration::from_secs(1), h.task)
            .await
            .expect("connector should stop without waiting out the delay")
            .unwrap();
        assert_eq!(*h.state_rx.borrow(), ConnectionState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_failure_is_counted_and_ingestion_continues() {
        let session = MockSession::events(vec![
            MockEvent::Text(trade("1.0", 1)),
            MockEvent::Delay(Duration::from_secs(1)),
            MockEvent::Text(trade("2.0", 2)),
        ])
        .then_hold();
        let mut h = start(vec![session], ConnectorConfig::default()).await;
        wait_for_state(&mut h.state_rx, ConnectionState::Connected).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        h.store.set_available(false);
        tokio::time::sleep(Duration::from_secs(2)).await;

        let stats = h.counters.snapshot();
        assert_eq!(stats.published, 1);
        assert_eq!(stats.publish_errors, 1);
        assert_eq!(*h.state_rx.borrow(), ConnectionState::Connected);

        h.store.set_available(true);
        h.shutdown_tx.send(()).unwrap();
        h.task.await.unwrap();
    }
}
