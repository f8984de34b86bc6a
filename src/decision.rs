//! Decision types for admission results.
//!
//! Every check produces a `Decision`: allowed or denied, the reason for a
//! denial, and a snapshot of the rate limit state the algorithm saw.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Why a request was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// The caller exceeded the configured rate.
    RateLimited,
    /// No algorithm is mapped for the route.
    NotConfigured,
    /// No rate limit key could be extracted from the request.
    KeyUnavailable,
    /// The counter store failed or timed out and the gateway fails closed.
    StoreUnavailable,
}

impl DenyReason {
    /// Stable machine-readable name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::NotConfigured => "not_configured",
            Self::KeyUnavailable => "key_unavailable",
            Self::StoreUnavailable => "store_unavailable",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The result of an admission check.
#[derive(Debug, Clone)]
pub struct Decision {
    /// Whether the request is allowed.
    allowed: bool,
    /// Why the request was denied (`None` when allowed).
    reason: Option<DenyReason>,
    /// Rate limit information.
    info: RateLimitInfo,
}

impl Decision {
    /// Create a new "allowed" decision.
    pub fn allowed(info: RateLimitInfo) -> Self {
        Self {
            allowed: true,
            reason: None,
            info,
        }
    }

    /// Create a new "denied" decision caused by the rate limit itself.
    pub fn denied(info: RateLimitInfo) -> Self {
        Self::rejected(DenyReason::RateLimited, info)
    }

    /// Create a denied decision with an explicit reason.
    pub fn rejected(reason: DenyReason, info: RateLimitInfo) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            info,
        }
    }

    /// Check if the request is allowed.
    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    /// Check if the request is denied.
    pub fn is_denied(&self) -> bool {
        !self.allowed
    }

    /// The denial reason, if denied.
    pub fn reason(&self) -> Option<DenyReason> {
        self.reason
    }

    /// Get the rate limit info.
    pub fn info(&self) -> &RateLimitInfo {
        &self.info
    }

    /// Consume the decision and return the info.
    pub fn into_info(self) -> RateLimitInfo {
        self.info
    }

    /// Retry-after in whole milliseconds, rounded up (0 when allowed).
    pub fn retry_after_ms(&self) -> u64 {
        self.info.retry_after.map(ceil_millis).unwrap_or(0)
    }
}

/// Information about the current rate limit state.
#[derive(Debug, Clone)]
pub struct RateLimitInfo {
    /// Maximum requests allowed.
    pub limit: u64,
    /// Requests that can still be admitted right now.
    pub remaining: u64,
    /// Time until the state for this key is back to a fresh quota.
    pub reset_after: Duration,
    /// How long to wait before retrying (only set when denied).
    pub retry_after: Option<Duration>,
    /// Name of the algorithm that made this decision.
    pub algorithm: Option<&'static str>,
    /// Additional metadata.
    pub metadata: Option<DecisionMetadata>,
}

impl RateLimitInfo {
    /// Create a new rate limit info.
    pub fn new(limit: u64, remaining: u64, reset_after: Duration) -> Self {
        Self {
            limit,
            remaining,
            reset_after,
            retry_after: None,
            algorithm: None,
            metadata: None,
        }
    }

    /// Info for decisions that were not produced by an algorithm.
    pub fn unmetered() -> Self {
        Self::new(0, 0, Duration::ZERO)
    }

    /// Set the retry-after duration.
    pub fn with_retry_after(mut self, duration: Duration) -> Self {
        self.retry_after = Some(duration);
        self
    }

    /// Set the algorithm name.
    pub fn with_algorithm(mut self, name: &'static str) -> Self {
        self.algorithm = Some(name);
        self
    }

    /// Set additional metadata.
    pub fn with_metadata(mut self, metadata: DecisionMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Get reset time as whole seconds from now, rounded up.
    pub fn reset_seconds(&self) -> u64 {
        ceil_secs(self.reset_after)
    }

    /// Convert to HTTP headers.
    ///
    /// Returns a vector of (header_name, header_value) pairs.
    pub fn to_headers(&self) -> Vec<(&'static str, String)> {
        crate::headers::RateLimitHeaders::from(self).to_vec()
    }
}

/// Additional metadata about a rate limit decision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionMetadata {
    /// Current tokens available (for token bucket).
    pub tokens_available: Option<f64>,
    /// Theoretical arrival time in Unix milliseconds, rounded up (for GCRA).
    pub tat: Option<u64>,
    /// Estimated request count in the lookback window (for sliding window).
    pub estimate: Option<f64>,
}

impl DecisionMetadata {
    /// Create new empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set tokens available.
    pub fn with_tokens_available(mut self, tokens: f64) -> Self {
        self.tokens_available = Some(tokens);
        self
    }

    /// Set GCRA TAT.
    pub fn with_tat(mut self, tat: u64) -> Self {
        self.tat = Some(tat);
        self
    }

    /// Set the sliding window estimate.
    pub fn with_estimate(mut self, estimate: f64) -> Self {
        self.estimate = Some(estimate);
        self
    }
}

pub(crate) fn ceil_millis(d: Duration) -> u64 {
    let ms = d.as_millis() as u64;
    if d.subsec_nanos() % 1_000_000 != 0 {
        ms + 1
    } else {
        ms
    }
}

fn ceil_secs(d: Duration) -> u64 {
    if d.subsec_nanos() > 0 {
        d.as_secs() + 1
    } else {
        d.as_secs()
    }
}
