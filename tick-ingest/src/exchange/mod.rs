// exchange/mod.rs
pub mod connector;
pub mod errors;
pub mod mock;
pub mod normalizer;
pub mod rate_limiter;
pub mod supervisor;
pub mod transport;
pub mod types;

pub use connector::{ConnectionState, ConnectorConfig, FeedCounters, FeedStats, SymbolFeed};
pub use errors::{FeedError, NormalizeError};
pub use mock::{MockEvent, MockFeedTransport, MockSession};
pub use normalizer::{normalize_frame, normalize_trade, trade_stream_url, validate_symbol};
pub use rate_limiter::{ReconnectionRateLimiter, ReconnectionRateLimiterConfig};
pub use supervisor::FeedSupervisor;
pub use transport::{FeedConnection, FeedFrame, FeedTransport, WsTransport};
