use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tick_common::error::{ErrorCategory, ErrorClassification};
use tick_common::Tick;

/// Storage sink errors
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Sink unavailable")]
    Unavailable,

    #[error("Schema error: {0}")]
    Schema(String),
}

impl ErrorClassification for SinkError {
    fn category(&self) -> ErrorCategory {
        match self {
            SinkError::Connection(_) | SinkError::Unavailable => ErrorCategory::Transient,
            SinkError::Query(_) => ErrorCategory::Transient,
            SinkError::Schema(_) => ErrorCategory::Configuration,
        }
    }

    fn suggested_retry_delay(&self) -> Option<Duration> {
        match self {
            SinkError::Connection(_) => Some(Duration::from_secs(1)),
            SinkError::Unavailable | SinkError::Query(_) => Some(Duration::from_millis(500)),
            SinkError::Schema(_) => None,
        }
    }
}

impl From<sqlx::Error> for SinkError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Tls(_) => SinkError::Connection(err.to_string()),
            other => SinkError::Query(other.to_string()),
        }
    }
}

pub type SinkResult<T> = Result<T, SinkError>;

/// Destination for flushed batches.
///
/// Inserts are keyed on `(symbol, time)`; rows that already exist are
/// skipped, so replaying a batch is harmless.
#[async_trait]
pub trait TickSink: Send + Sync {
    /// Insert a batch, returning the number of new rows
    async fn bulk_insert(&self, ticks: &[Tick]) -> SinkResult<usize>;

    /// Create tables and indexes when missing
    async fn ensure_schema(&self) -> SinkResult<()> {
        Ok(())
    }

    fn name(&self) -> &'static str;
}
