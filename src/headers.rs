//! HTTP headers for admission results.
//!
//! Standard and extended headers for communicating rate limit status.

use crate::decision::{Decision, DenyReason, RateLimitInfo};

/// Standard rate limit header names.
pub mod names {
    /// Maximum requests allowed per window.
    pub const RATE_LIMIT_LIMIT: &str = "X-RateLimit-Limit";

    /// Remaining requests in current window.
    pub const RATE_LIMIT_REMAINING: &str = "X-RateLimit-Remaining";

    /// Seconds until the rate limit resets.
    pub const RATE_LIMIT_RESET: &str = "X-RateLimit-Reset";

    /// Seconds until the client should retry (standard HTTP header).
    pub const RETRY_AFTER: &str = "Retry-After";

    /// Milliseconds until the client should retry (extended).
    pub const RETRY_AFTER_MS: &str = "X-RateLimit-Retry-After-Ms";

    /// The algorithm in effect (extended).
    pub const RATE_LIMIT_POLICY: &str = "X-RateLimit-Policy";

    /// Machine-readable denial reason (extended).
    pub const RATE_LIMIT_REASON: &str = "X-RateLimit-Reason";
}

/// Builder for rate limit headers.
#[derive(Debug, Default)]
pub struct RateLimitHeaders {
    limit: Option<u64>,
    remaining: Option<u64>,
    reset: Option<u64>,
    retry_after_ms: Option<u64>,
    policy: Option<String>,
    reason: Option<DenyReason>,
}

impl RateLimitHeaders {
    /// Create a new header builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the limit header.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the remaining header.
    pub fn remaining(mut self, remaining: u64) -> Self {
        self.remaining = Some(remaining);
        self
    }

    /// Set the reset header (seconds until reset).
    pub fn reset(mut self, reset_seconds: u64) -> Self {
        self.reset = Some(reset_seconds);
        self
    }

    /// Set the retry-after value in milliseconds.
    ///
    /// Emits both `Retry-After` (seconds, rounded up) and the millisecond header.
    pub fn retry_after_ms(mut self, millis: u64) -> Self {
        self.retry_after_ms = Some(millis);
        self
    }

    /// Set the policy header.
    pub fn policy(mut self, policy: impl Into<String>) -> Self {
        self.policy = Some(policy.into());
        self
    }

    /// Set the denial reason header.
    pub fn reason(mut self, reason: DenyReason) -> Self {
        self.reason = Some(reason);
        self
    }

    /// Convert to a vector of (name, value) pairs.
    pub fn to_vec(&self) -> Vec<(&'static str, String)> {
        let mut headers = Vec::new();

        if let Some(limit) = self.limit {
            headers.push((names::RATE_LIMIT_LIMIT, limit.to_string()));
        }
        if let Some(remaining) = self.remaining {
            headers.push((names::RATE_LIMIT_REMAINING, remaining.to_string()));
        }
        if let Some(reset) = self.reset {
            headers.push((names::RATE_LIMIT_RESET, reset.to_string()));
        }
        if let Some(ms) = self.retry_after_ms {
            headers.push((names::RETRY_AFTER, ms.div_ceil(1000).to_string()));
            headers.push((names::RETRY_AFTER_MS, ms.to_string()));
        }
        if let Some(ref policy) = self.policy {
            headers.push((names::RATE_LIMIT_POLICY, policy.clone()));
        }
        if let Some(reason) = self.reason {
            headers.push((names::RATE_LIMIT_REASON, reason.as_str().to_string()));
        }

        headers
    }
}

impl From<&RateLimitInfo> for RateLimitHeaders {
    fn from(info: &RateLimitInfo) -> Self {
        let mut headers = Self::new()
            .limit(info.limit)
            .remaining(info.remaining)
            .reset(info.reset_seconds());

        if let Some(retry) = info.retry_after {
            headers = headers.retry_after_ms(crate::decision::ceil_millis(retry));
        }

        if let Some(algo) = info.algorithm {
            headers = headers.policy(algo);
        }

        headers
    }
}

impl From<&Decision> for RateLimitHeaders {
    fn from(decision: &Decision) -> Self {
        let headers = Self::from(decision.info());
        match decision.reason() {
            Some(reason) => headers.reason(reason),
            None => headers,
        }
    }
}
