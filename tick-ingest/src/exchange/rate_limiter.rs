// exchange/rate_limiter.rs
//
// Reconnection rate guard for feed connectors.
// Stretches the reconnect wait when a connector is cycling too fast.

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorRateLimiter,
};
use std::num::NonZeroU32;
use std::time::Duration;

use super::errors::FeedError;

/// Configuration for reconnection rate limiting
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectionRateLimiterConfig {
    /// Maximum number of reconnection attempts allowed per window
    pub max_attempts: u32,
    /// Length of the window
    pub window: Duration,
    /// Wait duration when the limit is exceeded (defaults to the time one attempt takes to replenish)
    pub wait_on_limit_exceeded: Option<Duration>,
}

impl Default for ReconnectionRateLimiterConfig {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            window: Duration::from_secs(60),
            wait_on_limit_exceeded: None,
        }
    }
}

/// Reconnection rate limiter for a single feed connection
///
/// # Examples
///
/// ```
/// use tick_ingest::exchange::rate_limiter::{ReconnectionRateLimiter, ReconnectionRateLimiterConfig};
///
/// let limiter = ReconnectionRateLimiter::new(ReconnectionRateLimiterConfig::default()).unwrap();
///
/// if limiter.check_allowed() {
///     // Proceed with reconnection
/// } else {
///     // Wait limiter.wait_duration() before retrying
/// }
/// ```
pub struct ReconnectionRateLimiter {
    limiter: GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    config: ReconnectionRateLimiterConfig,
}

impl ReconnectionRateLimiter {
    /// Create a new rate limiter with the given configuration
    pub fn new(config: ReconnectionRateLimiterConfig) -> Result<Self, FeedError> {
        let burst = NonZeroU32::new(config.max_attempts).ok_or_else(|| {
            FeedError::Configuration("reconnect max_attempts must be > 0".to_string())
        })?;

        let quota = Quota::with_period(replenish_period(&config))
            .ok_or_else(|| {
                FeedError::Configuration("reconnect window must be > 0".to_string())
            })?
            .allow_burst(burst);

        Ok(Self {
            limiter: GovernorRateLimiter::direct(quota),
            config,
        })
    }

    /// Check if a reconnection attempt is allowed
    ///
    /// Returns `true` if the attempt is within the rate limit, `false` otherwise
    pub fn check_allowed(&self) -> bool {
        self.limiter.check().is_ok()
    }

    /// Get the wait duration when rate limit is exceeded
    pub fn wait_duration(&self) -> Duration {
        self.config
            .wait_on_limit_exceeded
            .unwrap_or_else(|| replenish_period(&self.config))
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }
}

fn replenish_period(config: &ReconnectionRateLimiterConfig) -> Duration {
    config.window / config.max_attempts.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread::sleep;

    fn limiter(max_attempts: u32, window: Duration) -> ReconnectionRateLimiter {
        ReconnectionRateLimiter::new(ReconnectionRateLimiterConfig {
            max_attempts,
            window,
            wait_on_limit_exceeded: None,
        })
        .unwrap()
    }

    #[test]
    fn test_rate_limiter_blocks_excessive_attempts() {
        let limiter = limiter(2, Duration::from_secs(60));

        assert!(limiter.check_allowed());
        assert!(limiter.check_allowed());
        assert!(!limiter.check_allowed(), "Third attempt should be blocked");
    }

    #[test]
    fn test_rate_limiter_replenishes() {
        let limiter = limiter(2, Duration::from_millis(200));

        assert!(limiter.check_allowed());
        assert!(limiter.check_allowed());
        assert!(!limiter.check_allowed());

        // One attempt comes back every window / max_attempts
        sleep(Duration::from_millis(150));
        assert!(limiter.check_allowed(), "Rate limiter should replenish");
    }

    #[test]
    fn test_wait_duration() {
        assert_eq!(
            limiter(5, Duration::from_secs(60)).wait_duration(),
            Duration::from_secs(12)
        );

        let custom = ReconnectionRateLimiter::new(ReconnectionRateLimiterConfig {
            max_attempts: 5,
            window: Duration::from_secs(60),
            wait_on_limit_exceeded: Some(Duration::from_secs(30)),
        })
        .unwrap();
        assert_eq!(custom.wait_duration(), Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let zero_attempts = ReconnectionRateLimiterConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(ReconnectionRateLimiter::new(zero_attempts).is_err());

        let zero_window = ReconnectionRateLimiterConfig {
            window: Duration::ZERO,
            ..Default::default()
        };
        assert!(ReconnectionRateLimiter::new(zero_window).is_err());
    }

    #[test]
    fn test_default_config() {
        let config = ReconnectionRateLimiterConfig::default();
        assert_eq!(config.max_attempts, 20);
        assert_eq!(config.window, Duration::from_secs(60));
        assert_eq!(config.wait_on_limit_exceeded, None);
    }

    #[test]
    fn test_concurrent_access() {
        use std::thread;

        let limiter = Arc::new(limiter(5, Duration::from_secs(10)));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                thread::spawn(move || limiter.check_allowed())
            })
            .collect();

        let allowed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(allowed, 5, "Should allow exactly max_attempts connections");
    }
}
