//! Quota configuration shared by the counting algorithms.
//!
//! A `Quota` is a rate over a time window: at most `max_requests` per
//! `window`. Fixed window, sliding window counter, sliding window log and
//! GCRA are all parameterised by one; the token bucket is described by its
//! capacity and refill rate instead.
//!
//! # Examples
//!
//! ```ignore
//! use admitgate::Quota;
//! use std::time::Duration;
//!
//! // 100 requests per minute
//! let quota = Quota::per_minute(100);
//!
//! // 50 requests per 30 seconds, validated
//! let quota = Quota::try_new(50, Duration::from_secs(30))?;
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Rate limiting quota: `max_requests` per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
    /// Maximum number of requests in the window.
    max_requests: u64,

    /// Time window duration.
    window: Duration,
}

impl Quota {
    /// Create a new quota with the given maximum requests and window.
    ///
    /// # Panics
    ///
    /// Panics if `max_requests` is 0 or `window` is shorter than one
    /// millisecond. Use [`Quota::try_new`] for values that come from
    /// configuration.
    pub fn new(max_requests: u64, window: Duration) -> Self {
        assert!(max_requests > 0, "max_requests must be greater than 0");
        assert!(
            window >= Duration::from_millis(1),
            "window must be at least 1ms"
        );

        Self {
            max_requests,
            window,
        }
    }

    /// Create a quota allowing `n` requests per second.
    pub fn per_second(n: u64) -> Self {
        Self::new(n, Duration::from_secs(1))
    }

    /// Create a quota allowing `n` requests per minute.
    pub fn per_minute(n: u64) -> Self {
        Self::new(n, Duration::from_secs(60))
    }

    /// Create a quota allowing `n` requests per hour.
    pub fn per_hour(n: u64) -> Self {
        Self::new(n, Duration::from_secs(3600))
    }

    /// Try to create a new quota, returning an error if invalid.
    pub fn try_new(max_requests: u64, window: Duration) -> Result<Self> {
        if max_requests == 0 {
            return Err(
                ConfigError::InvalidParameters("rate must be greater than 0".into()).into(),
            );
        }
        if window < Duration::from_millis(1) {
            return Err(ConfigError::InvalidParameters(format!(
                "window must be at least 1ms, got {:?}",
                window
            ))
            .into());
        }
        Ok(Self {
            max_requests,
            window,
        })
    }

    /// Get the maximum requests allowed per window.
    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    /// Get the window duration.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Window length in milliseconds.
    pub fn window_ms(&self) -> u64 {
        self.window.as_millis() as u64
    }

    /// Window length in microseconds.
    pub fn window_us(&self) -> u64 {
        self.window.as_micros() as u64
    }

    /// Emission interval: the steady-state spacing between requests,
    /// `window / max_requests`, in microseconds.
    ///
    /// Rounded up, so that `max_requests` intervals never fit in less than
    /// one window.
    pub fn emission_interval_us(&self) -> u64 {
        self.window_us().div_ceil(self.max_requests).max(1)
    }
}

impl Default for Quota {
    fn default() -> Self {
        Self::per_minute(60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_per_second() {
        let quota = Quota::per_second(10);
        assert_eq!(quota.max_requests(), 10);
        assert_eq!(quota.window(), Duration::from_secs(1));
        assert_eq!(quota.emission_interval_us(), 100_000);
    }

    #[test]
    fn test_quota_per_minute() {
        let quota = Quota::per_minute(100);
        assert_eq!(quota.window_ms(), 60_000);
        assert_eq!(quota.emission_interval_us(), 600_000);
    }

    #[test]
    fn test_emission_interval_below_one_millisecond() {
        let quota = Quota::new(5000, Duration::from_secs(1));
        assert_eq!(quota.emission_interval_us(), 200);
    }

    #[test]
    fn test_emission_interval_rounds_up() {
        let quota = Quota::new(3, Duration::from_secs(1));
        assert_eq!(quota.emission_interval_us(), 333_334);
        assert!(quota.emission_interval_us() * 3 >= quota.window_us());
    }

    #[test]
    fn test_try_new_rejects_zero() {
        assert!(Quota::try_new(0, Duration::from_secs(60)).is_err());
        assert!(Quota::try_new(10, Duration::ZERO).is_err());
        assert!(Quota::try_new(10, Duration::from_micros(500)).is_err());
        assert!(Quota::try_new(10, Duration::from_secs(1)).is_ok());
    }

    #[test]
    #[should_panic]
    fn test_quota_zero_requests_panics() {
        Quota::new(0, Duration::from_secs(60));
    }

    #[test]
    #[should_panic]
    fn test_quota_zero_window_panics() {
        Quota::new(100, Duration::ZERO);
    }
}
