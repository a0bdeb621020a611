pub mod accumulator;
pub mod errors;
pub mod pipeline;
pub mod types;

// Re-export main interfaces
pub use accumulator::BatchAccumulator;
pub use errors::{ServiceError, ServiceResult};
pub use pipeline::IngestionService;
pub use types::*;
