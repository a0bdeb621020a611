// metrics.rs - Prometheus metrics for the ingestion pipeline

use lazy_static::lazy_static;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // ============================================================================
    // Feed Metrics
    // ============================================================================

    /// Text frames received from the exchange feed
    pub static ref FRAMES_RECEIVED_TOTAL: IntCounter = IntCounter::new(
        "ingest_frames_received_total",
        "Total number of text frames received from the exchange feed"
    ).expect("Failed to create frames_received_total metric");

    /// Well-formed frames that carried no trade
    pub static ref FRAMES_IGNORED_TOTAL: IntCounter = IntCounter::new(
        "ingest_frames_ignored_total",
        "Total number of well-formed non-trade frames"
    ).expect("Failed to create frames_ignored_total metric");

    /// Frames dropped because they could not be normalized
    pub static ref FRAMES_MALFORMED_TOTAL: IntCounter = IntCounter::new(
        "ingest_frames_malformed_total",
        "Total number of malformed frames dropped"
    ).expect("Failed to create frames_malformed_total metric");

    /// Ticks appended to the log
    pub static ref TICKS_PUBLISHED_TOTAL: IntCounter = IntCounter::new(
        "ingest_ticks_published_total",
        "Total number of ticks appended to the log"
    ).expect("Failed to create ticks_published_total metric");

    /// Ticks that could not be appended to the log
    pub static ref PUBLISH_ERRORS_TOTAL: IntCounter = IntCounter::new(
        "ingest_publish_errors_total",
        "Total number of failed log appends"
    ).expect("Failed to create publish_errors_total metric");

    // ============================================================================
    // WebSocket Connection Metrics
    // ============================================================================

    /// Total feed connection attempts
    pub static ref WS_CONNECTIONS_TOTAL: IntCounter = IntCounter::new(
        "ingest_ws_connections_total",
        "Total number of feed connection attempts"
    ).expect("Failed to create ws_connections_total metric");

    /// Total feed reconnect cycles
    pub static ref WS_RECONNECTS_TOTAL: IntCounter = IntCounter::new(
        "ingest_ws_reconnects_total",
        "Total number of feed reconnect cycles"
    ).expect("Failed to create ws_reconnects_total metric");

    /// Currently connected feeds
    pub static ref WS_ACTIVE_CONNECTIONS: IntGauge = IntGauge::new(
        "ingest_ws_active_connections",
        "Number of feed connections currently open"
    ).expect("Failed to create ws_active_connections metric");

    // ============================================================================
    // Log Store Metrics
    // ============================================================================

    /// Entries a consumer group never saw because the log evicted them first
    pub static ref LOG_GAP_ENTRIES_TOTAL: IntCounter = IntCounter::new(
        "ingest_log_gap_entries_total",
        "Total number of entries evicted before a consumer group read them"
    ).expect("Failed to create log_gap_entries_total metric");

    /// Failed log reads in the batch consumer
    pub static ref LOG_READ_ERRORS_TOTAL: IntCounter = IntCounter::new(
        "ingest_log_read_errors_total",
        "Total number of failed log reads"
    ).expect("Failed to create log_read_errors_total metric");

    // ============================================================================
    // Batch Processing Metrics
    // ============================================================================

    /// Batches written to storage
    pub static ref BATCHES_FLUSHED_TOTAL: IntCounter = IntCounter::new(
        "ingest_batches_flushed_total",
        "Total number of batches successfully written to storage"
    ).expect("Failed to create batches_flushed_total metric");

    /// Batches the sink rejected and that went back to the buffer
    pub static ref BATCHES_FAILED_TOTAL: IntCounter = IntCounter::new(
        "ingest_batches_failed_total",
        "Total number of failed batch writes"
    ).expect("Failed to create batches_failed_total metric");

    /// Ticks handed to storage in successful batches
    pub static ref TICKS_INSERTED_TOTAL: IntCounter = IntCounter::new(
        "ingest_ticks_inserted_total",
        "Total number of ticks written in successful batches"
    ).expect("Failed to create ticks_inserted_total metric");

    /// Current batch buffer size (number of ticks)
    pub static ref BATCH_BUFFER_SIZE: IntGauge = IntGauge::new(
        "ingest_batch_buffer_size",
        "Current number of ticks waiting in the batch buffer"
    ).expect("Failed to create batch_buffer_size metric");

    /// Histogram of batch insert durations
    pub static ref BATCH_INSERT_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "ingest_batch_insert_duration_seconds",
            "Duration of batch insert operations in seconds"
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0])
    ).expect("Failed to create batch_insert_duration metric");
}

/// Register all metrics with the global registry
pub fn register_metrics() -> Result<(), prometheus::Error> {
    // Feed metrics
    REGISTRY.register(Box::new(FRAMES_RECEIVED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(FRAMES_IGNORED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(FRAMES_MALFORMED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(TICKS_PUBLISHED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PUBLISH_ERRORS_TOTAL.clone()))?;

    // WebSocket connection metrics
    REGISTRY.register(Box::new(WS_CONNECTIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(WS_RECONNECTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(WS_ACTIVE_CONNECTIONS.clone()))?;

    // Log store metrics
    REGISTRY.register(Box::new(LOG_GAP_ENTRIES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(LOG_READ_ERRORS_TOTAL.clone()))?;

    // Batch processing metrics
    REGISTRY.register(Box::new(BATCHES_FLUSHED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(BATCHES_FAILED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(TICKS_INSERTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(BATCH_BUFFER_SIZE.clone()))?;
    REGISTRY.register(Box::new(BATCH_INSERT_DURATION.clone()))?;

    Ok(())
}

/// Render every registered metric in the Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;

    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_encode() {
        register_metrics().unwrap();
        // Second registration is rejected rather than duplicated
        assert!(register_metrics().is_err());

        TICKS_PUBLISHED_TOTAL.inc();
        let text = encode_metrics().unwrap();

        assert!(text.contains("ingest_ticks_published_total"));
        assert!(text.contains("ingest_batch_insert_duration_seconds"));
        assert!(text.contains("ingest_ws_active_connections"));
    }
}
