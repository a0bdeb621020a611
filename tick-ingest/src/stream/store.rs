use async_trait::async_trait;
use std::time::Duration;
use tick_common::{EntryId, LogEntry, TickFields};

use super::errors::StoreResult;

// =================================================================
// Log Store Interface Definition
// =================================================================

/// Durable, bounded, append-only log with named consumer groups.
///
/// Each group keeps its own read cursor and its own set of delivered but
/// unacknowledged entries. Groups never affect each other.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Short backend name for logs
    fn backend(&self) -> &'static str;

    /// Check that the backend is reachable
    async fn ping(&self) -> StoreResult<()>;

    /// Append an entry, evicting the oldest entries beyond `max_len`
    async fn append(&self, log: &str, fields: &TickFields, max_len: usize) -> StoreResult<EntryId>;

    /// Create a consumer group whose cursor starts at the current tail.
    /// Creates the log when missing; an existing group is left untouched.
    async fn ensure_group(&self, log: &str, group: &str) -> StoreResult<()>;

    /// Deliver up to `max_count` entries newer than the group cursor to `consumer`,
    /// waiting up to `block` when nothing is available.
    async fn read(
        &self,
        log: &str,
        group: &str,
        consumer: &str,
        max_count: usize,
        block: Duration,
    ) -> StoreResult<Vec<LogEntry>>;

    /// Re-deliver entries still pending for `consumer` with ids greater than `after`
    async fn read_pending(
        &self,
        log: &str,
        group: &str,
        consumer: &str,
        max_count: usize,
        after: EntryId,
    ) -> StoreResult<Vec<LogEntry>>;

    /// Acknowledge entries; unknown or already acknowledged ids are ignored
    async fn ack(&self, log: &str, group: &str, ids: &[EntryId]) -> StoreResult<usize>;

    /// Number of entries currently held by the log
    async fn len(&self, log: &str) -> StoreResult<usize>;
}
