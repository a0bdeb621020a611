// tick-common: shared types for the tick ingestion pipeline
// Used by tick-ingest and by downstream consumers of the tick stream

pub mod data;
pub mod error;
pub mod logging;

pub use data::types::{EntryId, LogEntry, Tick, TickFields};
