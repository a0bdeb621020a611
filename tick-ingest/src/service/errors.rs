//! Service layer error types.

use crate::exchange::FeedError;
use crate::storage::SinkError;
use crate::stream::StoreError;
use thiserror::Error;
use tick_common::error::{ErrorCategory, ErrorClassification};

/// Service layer error types
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ServiceError {
    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("Log store error: {0}")]
    Store(#[from] StoreError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Service is already running")]
    AlreadyRunning,

    #[error("Task error: {0}")]
    Task(String),
}

impl ErrorClassification for ServiceError {
    fn category(&self) -> ErrorCategory {
        match self {
            ServiceError::Feed(e) => e.category(),
            ServiceError::Store(e) => e.category(),
            ServiceError::Sink(e) => e.category(),
            ServiceError::Configuration(_) => ErrorCategory::Configuration,
            ServiceError::AlreadyRunning => ErrorCategory::Permanent,
            ServiceError::Task(_) => ErrorCategory::Internal,
        }
    }

    fn suggested_retry_delay(&self) -> Option<std::time::Duration> {
        match self {
            ServiceError::Feed(e) => e.suggested_retry_delay(),
            ServiceError::Store(e) => e.suggested_retry_delay(),
            ServiceError::Sink(e) => e.suggested_retry_delay(),
            _ => None,
        }
    }
}

/// Result type for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;
