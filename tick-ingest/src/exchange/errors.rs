// exchange/errors.rs

use std::time::Duration;

use thiserror::Error;
use tick_common::error::{ErrorCategory, ErrorClassification};

/// Error types for feed connections
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Keepalive ping failed: {0}")]
    Ping(String),

    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ErrorClassification for FeedError {
    fn category(&self) -> ErrorCategory {
        match self {
            FeedError::Connection(_) | FeedError::WebSocket(_) | FeedError::Ping(_) => {
                ErrorCategory::Transient
            }
            FeedError::InvalidSymbol(_) | FeedError::Configuration(_) => {
                ErrorCategory::Configuration
            }
        }
    }

    fn suggested_retry_delay(&self) -> Option<Duration> {
        match self {
            FeedError::Connection(_) => Some(Duration::from_secs(5)),
            FeedError::WebSocket(_) | FeedError::Ping(_) => Some(Duration::from_secs(1)),
            _ => None,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for FeedError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        FeedError::WebSocket(err.to_string())
    }
}

/// A frame that could not be turned into a tick
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NormalizeError {
    #[error("Invalid JSON: {0}")]
    Json(String),

    #[error("Unexpected frame shape: {0}")]
    Shape(String),

    #[error("Invalid {field} '{value}'")]
    InvalidValue { field: &'static str, value: String },

    #[error("Missing trade and event time")]
    MissingTimestamp,

    #[error("Timestamp out of range: {0}")]
    TimestampOutOfRange(i64),
}

impl ErrorClassification for NormalizeError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Permanent
    }
}

impl From<serde_json::Error> for NormalizeError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() {
            NormalizeError::Shape(err.to_string())
        } else {
            NormalizeError::Json(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_error_classification() {
        assert!(FeedError::Connection("refused".into()).is_transient());
        assert!(FeedError::Ping("broken pipe".into()).is_transient());
        assert_eq!(
            FeedError::InvalidSymbol("??".into()).category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            FeedError::Connection("refused".into()).suggested_retry_delay(),
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn test_normalize_error_is_permanent() {
        let err: NormalizeError = serde_json::from_str::<serde_json::Value>("{oops")
            .unwrap_err()
            .into();
        assert!(matches!(err, NormalizeError::Json(_)));
        assert!(err.is_permanent());
    }
}
