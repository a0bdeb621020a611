//! Error classification shared by every stage of the pipeline.
//!
//! Each layer keeps its own `thiserror` enum and implements [`ErrorClassification`]
//! so the loops can decide whether to retry, drop or surface a failure.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tick_common::error::ErrorClassification;
//!
//! fn handle_error(err: impl ErrorClassification) {
//!     if err.is_transient() {
//!         if let Some(delay) = err.suggested_retry_delay() {
//!             // Retry after delay
//!         }
//!     }
//! }
//! ```

mod traits;

pub use traits::*;
