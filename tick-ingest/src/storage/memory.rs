//! In-memory sink with the same duplicate handling as the database

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashSet;
use tick_common::Tick;

use super::sink::{SinkError, SinkResult, TickSink};

#[derive(Default)]
struct MemorySinkState {
    rows: Vec<Tick>,
    keys: HashSet<(String, DateTime<Utc>)>,
    batches: Vec<Vec<Tick>>,
    fail_next: usize,
    failing: bool,
}

/// Sink that keeps rows in memory
#[derive(Default)]
pub struct MemorySink {
    state: Mutex<MemorySinkState>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` inserts
    pub fn fail_next(&self, n: usize) {
        self.state.lock().fail_next = n;
    }

    /// Fail every insert until switched back
    pub fn set_failing(&self, failing: bool) {
        self.state.lock().failing = failing;
    }

    /// Stored rows in insertion order
    pub fn rows(&self) -> Vec<Tick> {
        self.state.lock().rows.clone()
    }

    /// Every accepted batch as received, duplicates included
    pub fn batches(&self) -> Vec<Vec<Tick>> {
        self.state.lock().batches.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TickSink for MemorySink {
    async fn bulk_insert(&self, ticks: &[Tick]) -> SinkResult<usize> {
        let mut state = self.state.lock();
        if state.failing {
            return Err(SinkError::Unavailable);
        }
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(SinkError::Unavailable);
        }
        if ticks.is_empty() {
            return Ok(0);
        }

        let mut inserted = 0;
        for tick in ticks {
            if state.keys.insert(tick.key()) {
                state.rows.push(tick.clone());
                inserted += 1;
            }
        }
        state.batches.push(ticks.to_vec());
        Ok(inserted)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn tick(symbol: &str, millis: i64, price: f64) -> Tick {
        Tick::new(symbol, Utc.timestamp_millis_opt(millis).unwrap(), price, 1.0)
    }

    #[tokio::test]
    async fn test_duplicates_are_ignored() {
        let sink = MemorySink::new();
        let batch = vec![tick("btcusdt", 1, 10.0), tick("btcusdt", 2, 11.0)];

        assert_eq!(sink.bulk_insert(&batch).await.unwrap(), 2);
        assert_eq!(sink.bulk_insert(&batch).await.unwrap(), 0);
        // Same time on another symbol is a different row
        assert_eq!(sink.bulk_insert(&[tick("ethusdt", 1, 1.0)]).await.unwrap(), 1);

        assert_eq!(sink.len(), 3);
        assert_eq!(sink.batches().len(), 3);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let sink = MemorySink::new();
        sink.fail_next(1);
        assert!(sink.bulk_insert(&[tick("btcusdt", 1, 1.0)]).await.is_err());
        assert_eq!(sink.bulk_insert(&[tick("btcusdt", 1, 1.0)]).await.unwrap(), 1);

        sink.set_failing(true);
        assert!(sink.bulk_insert(&[tick("btcusdt", 2, 1.0)]).await.is_err());
        sink.set_failing(false);
        assert_eq!(sink.len(), 1);
        assert!(sink.batches().iter().all(|b| b.len() == 1));
    }
}
