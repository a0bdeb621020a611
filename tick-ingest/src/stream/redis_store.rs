use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamId, StreamMaxlen, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Client as RedisClient, RedisResult};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::errors::{StoreError, StoreResult};
use super::store::LogStore;
use crate::metrics;
use tick_common::{EntryId, LogEntry, TickFields};

// =================================================================
// Redis Streams Log Store
// =================================================================

/// Log store backed by Redis Streams (XADD / XREADGROUP / XACK).
///
/// Appends and acknowledgements share one multiplexed connection. Blocking
/// group reads get a dedicated connection so they never stall the writers.
pub struct RedisLogStore {
    writer: ConnectionManager,
    reader: Mutex<ConnectionManager>,
    approximate_trim: bool,
}

impl RedisLogStore {
    pub async fn connect(redis_url: &str, approximate_trim: bool) -> StoreResult<Self> {
        let client = RedisClient::open(redis_url)
            .map_err(|e| StoreError::Connection(format!("Invalid Redis URL: {}", e)))?;

        let writer = ConnectionManager::new(client.clone()).await?;
        let reader = ConnectionManager::new(client).await?;

        debug!("Connected to Redis at: {}", redis_url);

        Ok(Self {
            writer,
            reader: Mutex::new(reader),
            approximate_trim,
        })
    }

    fn maxlen(&self, max_len: usize) -> StreamMaxlen {
        if self.approximate_trim {
            StreamMaxlen::Approx(max_len)
        } else {
            StreamMaxlen::Equals(max_len)
        }
    }

    /// Acknowledge delivered ids whose payload was trimmed away
    async fn ack_trimmed(&self, log: &str, group: &str, trimmed: &[EntryId]) -> StoreResult<()> {
        if trimmed.is_empty() {
            return Ok(());
        }
        metrics::LOG_GAP_ENTRIES_TOTAL.inc_by(trimmed.len() as u64);
        warn!(
            "{} pending entries on '{}' were trimmed before group '{}' processed them",
            trimmed.len(),
            log,
            group
        );
        self.ack(log, group, trimmed).await?;
        Ok(())
    }
}

/// One XREADGROUP reply, split into usable entries and trimmed ids
#[derive(Debug, Default)]
pub(crate) struct DecodedReply {
    pub entries: Vec<LogEntry>,
    pub trimmed: Vec<EntryId>,
    /// Highest id in the reply, trimmed ones included
    pub last_id: Option<EntryId>,
}

impl DecodedReply {
    /// Where to continue a pending scan when every id in this reply was trimmed
    pub fn resume_after(&self) -> Option<EntryId> {
        if self.entries.is_empty() {
            self.last_id
        } else {
            None
        }
    }
}

pub(crate) fn decode_reply(reply: Option<StreamReadReply>) -> StoreResult<DecodedReply> {
    let mut decoded = DecodedReply::default();

    for key in reply.map(|r| r.keys).unwrap_or_default() {
        for stream_id in &key.ids {
            let id = parse_id(&stream_id.id)?;
            decoded.last_id = Some(decoded.last_id.map_or(id, |last| last.max(id)));
            match entry_from_stream_id(stream_id)? {
                Some(entry) => decoded.entries.push(entry),
                None => decoded.trimmed.push(id),
            }
        }
    }
    Ok(decoded)
}

fn parse_id(raw: &str) -> StoreResult<EntryId> {
    raw.parse()
        .map_err(|e| StoreError::InvalidEntry(format!("{}", e)))
}

/// Decode one stream entry. `None` when the entry no longer carries fields.
///
/// Fields whose values are not text are left out, so the entry still reaches
/// the consumer and fails tick decoding there instead of failing the whole read.
pub(crate) fn entry_from_stream_id(stream_id: &StreamId) -> StoreResult<Option<LogEntry>> {
    if stream_id.map.is_empty() {
        return Ok(None);
    }

    let id = parse_id(&stream_id.id)?;
    let mut fields = TickFields::new();
    for (name, value) in &stream_id.map {
        match field_text(value) {
            Some(text) => {
                fields.insert(name.clone(), text);
            }
            None => warn!("Dropping non-text field '{}' of entry {}", name, stream_id.id),
        }
    }
    Ok(Some(LogEntry::new(id, fields)))
}

fn field_text(value: &redis::Value) -> Option<String> {
    match value {
        redis::Value::Data(bytes) => String::from_utf8(bytes.clone()).ok(),
        other => redis::from_redis_value(other).ok(),
    }
}

#[async_trait]
impl LogStore for RedisLogStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.writer.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn append(&self, log: &str, fields: &TickFields, max_len: usize) -> StoreResult<EntryId> {
        let mut conn = self.writer.clone();
        let items: Vec<(&str, &str)> = fields
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        let id: String = conn
            .xadd_maxlen(log, self.maxlen(max_len), "*", &items)
            .await?;
        parse_id(&id)
    }

    async fn ensure_group(&self, log: &str, group: &str) -> StoreResult<()> {
        let mut conn = self.writer.clone();
        let result: RedisResult<()> = conn.xgroup_create_mkstream(log, group, "$").await;

        match result {
            Ok(()) => {
                info!("Created consumer group '{}' on '{}'", group, log);
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => {
                debug!("Consumer group '{}' already exists on '{}'", group, log);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn read(
        &self,
        log: &str,
        group: &str,
        consumer: &str,
        max_count: usize,
        block: Duration,
    ) -> StoreResult<Vec<LogEntry>> {
        let mut options = StreamReadOptions::default()
            .group(group, consumer)
            .count(max_count);
        // BLOCK 0 would wait forever
        if !block.is_zero() {
            options = options.block(block.as_millis().max(1) as usize);
        }

        let reply: Option<StreamReadReply> = {
            let mut conn = self.reader.lock().await;
            conn.xread_options(&[log], &[">"], &options).await?
        };
        let decoded = decode_reply(reply)?;
        self.ack_trimmed(log, group, &decoded.trimmed).await?;
        Ok(decoded.entries)
    }

    async fn read_pending(
        &self,
        log: &str,
        group: &str,
        consumer: &str,
        max_count: usize,
        after: EntryId,
    ) -> StoreResult<Vec<LogEntry>> {
        let options = StreamReadOptions::default()
            .group(group, consumer)
            .count(max_count);
        let mut start = after;

        // A page made only of trimmed ids says nothing about later pending entries
        loop {
            let reply: Option<StreamReadReply> = {
                let mut conn = self.reader.lock().await;
                conn.xread_options(&[log], &[start.to_string()], &options)
                    .await?
            };
            let decoded = decode_reply(reply)?;
            self.ack_trimmed(log, group, &decoded.trimmed).await?;

            match decoded.resume_after() {
                Some(last) => start = last,
                None => return Ok(decoded.entries),
            }
        }
    }

    async fn ack(&self, log: &str, group: &str, ids: &[EntryId]) -> StoreResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.writer.clone();
        let ids: Vec<String> = ids.iter().map(EntryId::to_string).collect();
        let acked: usize = conn.xack(log, group, &ids).await?;
        Ok(acked)
    }

    async fn len(&self, log: &str) -> StoreResult<usize> {
        let mut conn = self.writer.clone();
        let len: usize = conn.xlen(log).await?;
        Ok(len)
    }
}
