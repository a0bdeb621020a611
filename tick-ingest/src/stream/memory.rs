use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use super::errors::{StoreError, StoreResult};
use super::store::LogStore;
use crate::metrics;
use tick_common::{EntryId, LogEntry, TickFields};

// =================================================================
// In-process Log Store
// =================================================================

#[derive(Debug)]
struct GroupState {
    /// Last id delivered to this group
    cursor: EntryId,
    /// Position of the next entry to deliver, in append order
    next_pos: u64,
    /// Delivered but unacknowledged ids, with the owning consumer
    pending: BTreeMap<EntryId, String>,
}

#[derive(Debug, Default)]
struct LogState {
    entries: VecDeque<LogEntry>,
    /// Append position of `entries[0]`
    base_pos: u64,
    last_id: EntryId,
    groups: HashMap<String, GroupState>,
}

impl LogState {
    fn tail_pos(&self) -> u64 {
        self.base_pos + self.entries.len() as u64
    }

    fn find(&self, id: EntryId) -> Option<&LogEntry> {
        self.entries
            .binary_search_by_key(&id, |e| e.id)
            .ok()
            .map(|idx| &self.entries[idx])
    }
}

/// Bounded in-process log store with consumer groups.
///
/// Used for tests and single-process deployments; entries do not survive a restart.
#[derive(Default)]
pub struct MemoryLogStore {
    logs: Mutex<HashMap<String, LogState>>,
    appended: Notify,
    unavailable: AtomicBool,
    gap_entries: AtomicU64,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an unreachable backend
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Entries skipped by consumer groups because they were evicted first
    pub fn gap_entries(&self) -> u64 {
        self.gap_entries.load(Ordering::Relaxed)
    }

    /// Number of delivered but unacknowledged entries for a group
    pub fn pending_len(&self, log: &str, group: &str) -> usize {
        self.logs
            .lock()
            .get(log)
            .and_then(|l| l.groups.get(group))
            .map(|g| g.pending.len())
            .unwrap_or(0)
    }

    /// Current cursor of a group
    pub fn group_cursor(&self, log: &str, group: &str) -> Option<EntryId> {
        self.logs
            .lock()
            .get(log)
            .and_then(|l| l.groups.get(group))
            .map(|g| g.cursor)
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        Ok(())
    }

    fn record_gap(&self, log: &str, group: &str, skipped: u64) {
        self.gap_entries.fetch_add(skipped, Ordering::Relaxed);
        metrics::LOG_GAP_ENTRIES_TOTAL.inc_by(skipped);
        warn!(
            "Consumer group '{}' on '{}' lagged behind eviction, {} entries skipped",
            group, log, skipped
        );
    }

    /// Deliver what is available right now, without waiting
    fn take_new(
        &self,
        log: &str,
        group: &str,
        consumer: &str,
        max_count: usize,
    ) -> StoreResult<Vec<LogEntry>> {
        let mut logs = self.logs.lock();
        let unknown = || StoreError::UnknownGroup {
            log: log.to_string(),
            group: group.to_string(),
        };
        let state = logs.get_mut(log).ok_or_else(unknown)?;
        let base_pos = state.base_pos;
        let tail_pos = state.tail_pos();
        let group_state = state.groups.get_mut(group).ok_or_else(unknown)?;

        let mut skipped = 0;
        if group_state.next_pos < base_pos {
            skipped = base_pos - group_state.next_pos;
            group_state.next_pos = base_pos;
        }

        let start = (group_state.next_pos - base_pos) as usize;
        let count = ((tail_pos - group_state.next_pos) as usize).min(max_count);
        let delivered: Vec<LogEntry> = state
            .entries
            .iter()
            .skip(start)
            .take(count)
            .cloned()
            .collect();

        if let Some(last) = delivered.last() {
            group_state.cursor = last.id;
            group_state.next_pos += delivered.len() as u64;
            for entry in &delivered {
                group_state.pending.insert(entry.id, consumer.to_string());
            }
        }
        drop(logs);

        if skipped > 0 {
            self.record_gap(log, group, skipped);
        }
        Ok(delivered)
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> StoreResult<()> {
        self.check_available()
    }

    async fn append(&self, log: &str, fields: &TickFields, max_len: usize) -> StoreResult<EntryId> {
        self.check_available()?;

        let now_millis = Utc::now().timestamp_millis().max(0) as u64;
        let id = {
            let mut logs = self.logs.lock();
            let state = logs.entry(log.to_string()).or_default();

            let id = state.last_id.successor(now_millis);
            state.last_id = id;
            state.entries.push_back(LogEntry::new(id, fields.clone()));

            // Eviction ignores pending entries
            while state.entries.len() > max_len.max(1) {
                state.entries.pop_front();
                state.base_pos += 1;
            }
            id
        };

        self.appended.notify_waiters();
        Ok(id)
    }

    async fn ensure_group(&self, log: &str, group: &str) -> StoreResult<()> {
        self.check_available()?;

        let mut logs = self.logs.lock();
        let state = logs.entry(log.to_string()).or_default();
        if state.groups.contains_key(group) {
            debug!("Consumer group '{}' already exists on '{}'", group, log);
            return Ok(());
        }

        let group_state = GroupState {
            cursor: state.last_id,
            next_pos: state.tail_pos(),
            pending: BTreeMap::new(),
        };
        state.groups.insert(group.to_string(), group_state);
        debug!("Created consumer group '{}' on '{}'", group, log);
        Ok(())
    }

    async fn read(
        &self,
        log: &str,
        group: &str,
        consumer: &str,
        max_count: usize,
        block: Duration,
    ) -> StoreResult<Vec<LogEntry>> {
        let deadline = Instant::now() + block;

        loop {
            self.check_available()?;

            // Register interest before looking so an append in between is not missed
            let appended = self.appended.notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            let delivered = self.take_new(log, group, consumer, max_count)?;
            if !delivered.is_empty() || block.is_zero() {
                return Ok(delivered);
            }

            if timeout_at(deadline, appended).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn read_pending(
        &self,
        log: &str,
        group: &str,
        consumer: &str,
        max_count: usize,
        after: EntryId,
    ) -> StoreResult<Vec<LogEntry>> {
        self.check_available()?;

        let mut logs = self.logs.lock();
        let unknown = || StoreError::UnknownGroup {
            log: log.to_string(),
            group: group.to_string(),
        };
        let state = logs.get_mut(log).ok_or_else(unknown)?;

        let owned: Vec<EntryId> = state
            .groups
            .get(group)
            .ok_or_else(unknown)?
            .pending
            .range((std::ops::Bound::Excluded(after), std::ops::Bound::Unbounded))
            .filter(|(_, owner)| owner.as_str() == consumer)
            .map(|(id, _)| *id)
            .collect();

        let mut delivered = Vec::new();
        let mut evicted = Vec::new();
        for id in owned {
            if delivered.len() >= max_count {
                break;
            }
            match state.find(id) {
                Some(entry) => delivered.push(entry.clone()),
                None => evicted.push(id),
            }
        }

        // Pending entries that were evicted can never be delivered again
        if let Some(group_state) = state.groups.get_mut(group) {
            for id in &evicted {
                group_state.pending.remove(id);
            }
        }
        drop(logs);

        if !evicted.is_empty() {
            self.record_gap(log, group, evicted.len() as u64);
        }
        Ok(delivered)
    }

    async fn ack(&self, log: &str, group: &str, ids: &[EntryId]) -> StoreResult<usize> {
        self.check_available()?;

        let mut logs = self.logs.lock();
        let Some(group_state) = logs.get_mut(log).and_then(|l| l.groups.get_mut(group)) else {
            return Ok(0);
        };
        Ok(ids
            .iter()
            .filter(|id| group_state.pending.remove(*id).is_some())
            .count())
    }

    async fn len(&self, log: &str) -> StoreResult<usize> {
        self.check_available()?;
        Ok(self
            .logs
            .lock()
            .get(log)
            .map(|l| l.entries.len())
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;
    use tick_common::Tick;

    const LOG: &str = "ticks_stream";

    fn fields(price: f64) -> TickFields {
        Tick::new(
            "btcusdt",
            Utc.timestamp_millis_opt(1_672_531_382_000).unwrap(),
            price,
            0.01,
        )
        .to_fields()
    }

    async fn append_prices(store: &MemoryLogStore, prices: &[f64], max_len: usize) -> Vec<EntryId> {
        let mut ids = Vec::new();
        for price in prices {
            ids.push(store.append(LOG, &fields(*price), max_len).await.unwrap());
        }
        ids
    }

    fn prices(entries: &[LogEntry]) -> Vec<f64> {
        entries.iter().map(|e| e.tick().unwrap().price).collect()
    }

    #[tokio::test]
    async fn test_ids_strictly_increase() {
        let store = MemoryLogStore::new();
        let ids = append_prices(&store, &[1.0, 2.0, 3.0, 4.0], 100).await;

        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_group_starts_at_tail() {
        let store = MemoryLogStore::new();
        append_prices(&store, &[1.0, 2.0], 100).await;

        store.ensure_group(LOG, "ingestor_group").await.unwrap();
        append_prices(&store, &[3.0], 100).await;

        let entries = store
            .read(LOG, "ingestor_group", "c1", 10, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(prices(&entries), vec![3.0]);
    }

    #[tokio::test]
    async fn test_ensure_group_is_idempotent() {
        let store = MemoryLogStore::new();
        store.ensure_group(LOG, "g").await.unwrap();
        append_prices(&store, &[1.0], 100).await;

        // A second ensure must not move the cursor
        store.ensure_group(LOG, "g").await.unwrap();
        let entries = store.read(LOG, "g", "c1", 10, Duration::ZERO).await.unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_read_unknown_group_fails() {
        let store = MemoryLogStore::new();
        let result = store.read(LOG, "missing", "c1", 10, Duration::ZERO).await;
        assert!(matches!(result, Err(StoreError::UnknownGroup { .. })));
    }

    #[tokio::test]
    async fn test_groups_are_isolated() {
        let store = MemoryLogStore::new();
        for group in ["ingestor_group", "analytics_group", "alerting_group"] {
            store.ensure_group(LOG, group).await.unwrap();
        }
        let ids = append_prices(&store, &[1.0, 2.0, 3.0], 100).await;

        let ingest = store
            .read(LOG, "ingestor_group", "c1", 10, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(ingest.len(), 3);
        assert_eq!(store.ack(LOG, "ingestor_group", &ids).await.unwrap(), 3);

        // Acknowledging in one group leaves the others untouched
        let analytics = store
            .read(LOG, "analytics_group", "a1", 2, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(prices(&analytics), vec![1.0, 2.0]);
        assert_eq!(store.pending_len(LOG, "analytics_group"), 2);
        assert_eq!(store.pending_len(LOG, "alerting_group"), 0);

        let alerting = store
            .read(LOG, "alerting_group", "x1", 10, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(alerting.len(), 3);
    }

    #[tokio::test]
    async fn test_ack_is_at_most_once() {
        let store = MemoryLogStore::new();
        store.ensure_group(LOG, "g").await.unwrap();
        let ids = append_prices(&store, &[1.0, 2.0], 100).await;
        store.read(LOG, "g", "c1", 10, Duration::ZERO).await.unwrap();

        assert_eq!(store.ack(LOG, "g", &ids[..1]).await.unwrap(), 1);
        assert_eq!(store.ack(LOG, "g", &ids[..1]).await.unwrap(), 0);
        assert_eq!(store.ack(LOG, "g", &[EntryId::new(1, 0)]).await.unwrap(), 0);
        assert_eq!(store.ack(LOG, "nope", &ids).await.unwrap(), 0);

        // Acknowledged entries are never redelivered
        let again = store.read(LOG, "g", "c1", 10, Duration::ZERO).await.unwrap();
        assert!(again.is_empty());
        let pending = store
            .read_pending(LOG, "g", "c1", 10, EntryId::ZERO)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, ids[1]);
    }

    #[tokio::test]
    async fn test_bounded_eviction_and_gap() {
        let store = MemoryLogStore::new();
        store.ensure_group(LOG, "slow").await.unwrap();

        let ids = append_prices(&store, &[1.0, 2.0, 3.0, 4.0, 5.0], 3).await;
        assert_eq!(store.len(LOG).await.unwrap(), 3);

        // The lagging cursor resumes at the oldest surviving entry
        let entries = store.read(LOG, "slow", "c1", 10, Duration::ZERO).await.unwrap();
        assert_eq!(prices(&entries), vec![3.0, 4.0, 5.0]);
        assert_eq!(store.gap_entries(), 2);
        assert_eq!(store.group_cursor(LOG, "slow"), Some(ids[4]));
    }

    #[tokio::test]
    async fn test_eviction_ignores_pending() {
        let store = MemoryLogStore::new();
        store.ensure_group(LOG, "g").await.unwrap();
        append_prices(&store, &[1.0, 2.0], 2).await;
        store.read(LOG, "g", "c1", 10, Duration::ZERO).await.unwrap();

        // Both pending entries get evicted by newer appends
        append_prices(&store, &[3.0, 4.0], 2).await;
        assert_eq!(store.len(LOG).await.unwrap(), 2);

        let pending = store
            .read_pending(LOG, "g", "c1", 10, EntryId::ZERO)
            .await
            .unwrap();
        assert!(pending.is_empty());
        assert_eq!(store.pending_len(LOG, "g"), 0);
        assert_eq!(store.gap_entries(), 2);
    }

    #[tokio::test]
    async fn test_read_pending_is_per_consumer_and_paged() {
        let store = MemoryLogStore::new();
        store.ensure_group(LOG, "g").await.unwrap();
        append_prices(&store, &[1.0, 2.0, 3.0], 100).await;
        store.read(LOG, "g", "c1", 2, Duration::ZERO).await.unwrap();
        store.read(LOG, "g", "c2", 2, Duration::ZERO).await.unwrap();

        let first = store
            .read_pending(LOG, "g", "c1", 1, EntryId::ZERO)
            .await
            .unwrap();
        assert_eq!(prices(&first), vec![1.0]);
        let second = store
            .read_pending(LOG, "g", "c1", 1, first[0].id)
            .await
            .unwrap();
        assert_eq!(prices(&second), vec![2.0]);
        let done = store
            .read_pending(LOG, "g", "c1", 1, second[0].id)
            .await
            .unwrap();
        assert!(done.is_empty());

        let other = store
            .read_pending(LOG, "g", "c2", 10, EntryId::ZERO)
            .await
            .unwrap();
        assert_eq!(prices(&other), vec![3.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_read_wakes_on_append() {
        let store = Arc::new(MemoryLogStore::new());
        store.ensure_group(LOG, "g").await.unwrap();

        let reader = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .read(LOG, "g", "c1", 10, Duration::from_secs(5))
                    .await
                    .unwrap()
            })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        append_prices(&store, &[7.0], 100).await;

        let entries = reader.await.unwrap();
        assert_eq!(prices(&entries), vec![7.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_read_times_out_empty() {
        let store = MemoryLogStore::new();
        store.ensure_group(LOG, "g").await.unwrap();

        let started = Instant::now();
        let entries = store
            .read(LOG, "g", "c1", 10, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(entries.is_empty());
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_unavailable_backend_surfaces_errors() {
        let store = MemoryLogStore::new();
        store.set_available(false);

        assert!(matches!(store.ping().await, Err(StoreError::Unavailable)));
        assert!(store.append(LOG, &fields(1.0), 10).await.is_err());

        store.set_available(true);
        assert!(store.ping().await.is_ok());
    }
}
