//! Storage sinks for flushed tick batches

mod memory;
mod sink;
mod timescale;

pub use memory::MemorySink;
pub use sink::{SinkError, SinkResult, TickSink};
pub use timescale::{TimescaleSink, MAX_BATCH_SIZE};
