// stream/mod.rs
pub mod errors;
pub mod memory;
pub mod publisher;
pub mod redis_store;
pub mod store;

pub use errors::{StoreError, StoreResult};
pub use memory::MemoryLogStore;
pub use publisher::TickPublisher;
pub use redis_store::RedisLogStore;
pub use store::LogStore;
