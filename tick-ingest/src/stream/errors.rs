//! Log store error types.

use std::time::Duration;

use thiserror::Error;
use tick_common::error::{ErrorCategory, ErrorClassification};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Log store connection error: {0}")]
    Connection(String),

    #[error("Log store unavailable")]
    Unavailable,

    #[error("Log store command failed: {0}")]
    Command(String),

    #[error("No consumer group '{group}' on log '{log}'")]
    UnknownGroup { log: String, group: String },

    #[error("Invalid log entry: {0}")]
    InvalidEntry(String),
}

impl ErrorClassification for StoreError {
    fn category(&self) -> ErrorCategory {
        match self {
            StoreError::Connection(_) | StoreError::Unavailable => ErrorCategory::Transient,
            StoreError::UnknownGroup { .. } => ErrorCategory::Configuration,
            StoreError::Command(_) | StoreError::InvalidEntry(_) => ErrorCategory::Permanent,
        }
    }

    fn suggested_retry_delay(&self) -> Option<Duration> {
        match self {
            StoreError::Connection(_) => Some(Duration::from_secs(1)),
            StoreError::Unavailable => Some(Duration::from_millis(500)),
            _ => None,
        }
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error()
            || err.is_connection_refusal()
            || err.is_connection_dropped()
            || err.is_timeout()
        {
            StoreError::Connection(err.to_string())
        } else {
            StoreError::Command(err.to_string())
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_classification() {
        assert!(StoreError::Connection("reset".into()).is_transient());
        assert!(StoreError::Unavailable.is_transient());
        assert!(StoreError::InvalidEntry("bad id".into()).is_permanent());
        assert_eq!(
            StoreError::Connection("reset".into()).suggested_retry_delay(),
            Some(Duration::from_secs(1))
        );
    }

    #[test]
    fn test_redis_error_mapping() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: StoreError = redis::RedisError::from(io).into();
        assert!(matches!(err, StoreError::Connection(_)));

        let err: StoreError =
            redis::RedisError::from((redis::ErrorKind::TypeError, "wrong type")).into();
        assert!(matches!(err, StoreError::Command(_)));
    }
}
