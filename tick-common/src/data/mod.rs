pub mod types;

pub use types::{DataError, DataResult, EntryId, LogEntry, Tick, TickFields};
