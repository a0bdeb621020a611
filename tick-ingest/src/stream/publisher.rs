use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

use super::errors::StoreResult;
use super::store::LogStore;
use crate::metrics;
use tick_common::{EntryId, Tick};

/// Appends normalized ticks to the configured log
pub struct TickPublisher {
    store: Arc<dyn LogStore>,
    log_name: String,
    max_len: usize,
    published: AtomicU64,
}

impl TickPublisher {
    pub fn new(store: Arc<dyn LogStore>, log_name: impl Into<String>, max_len: usize) -> Self {
        Self {
            store,
            log_name: log_name.into(),
            max_len,
            published: AtomicU64::new(0),
        }
    }

    pub async fn publish(&self, tick: &Tick) -> StoreResult<EntryId> {
        let id = self
            .store
            .append(&self.log_name, &tick.to_fields(), self.max_len)
            .await?;

        self.published.fetch_add(1, Ordering::Relaxed);
        metrics::TICKS_PUBLISHED_TOTAL.inc();
        trace!("Published {} @ {} as {}", tick.symbol, tick.price, id);
        Ok(id)
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn log_name(&self) -> &str {
        &self.log_name
    }
}
