use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// When consumed log entries are acknowledged
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckMode {
    /// Acknowledge only once the sink accepted the batch (at-least-once)
    #[default]
    AfterFlush,
    /// Acknowledge right after buffering; entries in memory are lost on crash
    OnRead,
}

/// Batch accumulator configuration
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Log to consume
    pub log_name: String,
    /// Consumer group
    pub group: String,
    /// Consumer name inside the group
    pub consumer: String,
    /// Flush when this many ticks are buffered
    pub batch_size: usize,
    /// Flush a non-empty buffer at least this often
    pub timeout: Duration,
    /// Entries requested per read
    pub read_count: usize,
    /// Longest wait for new entries per read
    pub read_block: Duration,
    /// Stats log period
    pub stats_interval: Duration,
    pub ack_mode: AckMode,
    /// Reading pauses while the buffer holds this many ticks
    pub max_buffer_ticks: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            log_name: "ticks_stream".to_string(),
            group: "ingestor_group".to_string(),
            consumer: "ingestor-1".to_string(),
            batch_size: 500,
            timeout: Duration::from_secs(1),
            read_count: 100,
            read_block: Duration::from_millis(1000),
            stats_interval: Duration::from_secs(30),
            ack_mode: AckMode::AfterFlush,
            max_buffer_ticks: 50_000,
        }
    }
}

/// Batch accumulator counters
#[derive(Debug, Clone, Default)]
pub struct BatchStats {
    /// Successful flushes
    pub batches_processed: u64,
    /// Ticks handed to the sink in successful batches, duplicates included
    pub ticks_inserted: u64,
    /// Ticks taken from the log, recovered ones included
    pub ticks_read: u64,
    /// Failed flushes
    pub errors: u64,
    /// Failed reads
    pub read_errors: u64,
    /// Entries acknowledged
    pub acked: u64,
    /// Pending entries replayed at startup
    pub recovered: u64,
    /// Entries acknowledged without being buffered because they did not decode
    pub malformed_entries: u64,
    pub last_flush_time: Option<DateTime<Utc>>,
}
