//! Token Bucket rate limiting algorithm.
//!
//! A bucket holds up to `capacity` tokens and refills continuously at
//! `refill_rate` tokens per second. Each request takes one token; a request
//! that finds fewer tokens than it needs is denied.

use std::time::Duration;

use crate::algorithm::{retry_hits, Algorithm};
use crate::decision::{Decision, DecisionMetadata, RateLimitInfo};
use crate::error::{ConfigError, Result};
use crate::storage::{AtomicOp, ChargeMode, OpOutcome, StorageEntry};

/// Tolerance for floating point refill arithmetic.
const EPSILON: f64 = 1e-9;

/// Token Bucket rate limiting algorithm.
///
/// Allows controlled bursts while enforcing an average rate limit.
/// Tokens are refilled at a constant rate up to maximum capacity.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
}

impl TokenBucket {
    /// Create a token bucket.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` or `refill_rate` is not a positive finite number.
    pub fn new(capacity: f64, refill_rate: f64) -> Self {
        match Self::try_new(capacity, refill_rate) {
            Ok(bucket) => bucket,
            Err(e) => panic!("{}", e),
        }
    }

    /// Create a token bucket, validating its parameters.
    pub fn try_new(capacity: f64, refill_rate: f64) -> Result<Self> {
        if !(capacity.is_finite() && capacity > 0.0) {
            return Err(ConfigError::InvalidParameters(format!(
                "capacity must be positive, got {}",
                capacity
            ))
            .into());
        }
        if !(refill_rate.is_finite() && refill_rate > 0.0) {
            return Err(ConfigError::InvalidParameters(format!(
                "refill_rate must be positive, got {}",
                refill_rate
            ))
            .into());
        }
        Ok(Self {
            capacity,
            refill_rate,
        })
    }

    /// Maximum number of tokens.
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Tokens added per second.
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    /// Time for `tokens` to be refilled.
    fn refill_time(&self, tokens: f64) -> Duration {
        Duration::from_secs_f64((tokens / self.refill_rate).max(0.0))
    }
}

/// Refill, then decrement.
///
/// A missing bucket starts full. Refill uses `now - last_update` clamped at
/// zero, so a caller with a lagging clock never mints tokens; `last_update`
/// never moves backwards. Tokens stay within `[0, capacity]`.
pub fn refill_and_take(
    current: Option<&StorageEntry>,
    now: u64,
    capacity: f64,
    refill_rate: f64,
    hits: u64,
    mode: ChargeMode,
) -> OpOutcome {
    let (tokens, last_update) = match current {
        Some(entry) if entry.tokens.is_some() => (entry.tokens_or_default(), entry.last_update),
        _ => (capacity, now),
    };

    let elapsed_secs = now.saturating_sub(last_update) as f64 / 1000.0;
    let mut tokens = (tokens + elapsed_secs * refill_rate).clamp(0.0, capacity);
    let last_update = last_update.max(now);

    let needed = hits as f64;
    let allowed = tokens + EPSILON >= needed;
    if allowed || mode == ChargeMode::Charge {
        tokens = (tokens - needed).max(0.0);
    }

    OpOutcome::new(allowed, StorageEntry::with_tokens(tokens, last_update))
}

impl Algorithm for TokenBucket {
    fn name(&self) -> &'static str {
        "token_bucket"
    }

    fn limit(&self) -> u64 {
        self.capacity.floor() as u64
    }

    fn ttl(&self, _now: u64, _hits: u64) -> Duration {
        // An expired bucket comes back full, which is where it would be by now.
        self.refill_time(self.capacity).max(Duration::from_millis(1))
    }

    fn op(&self, now: u64, hits: u64, mode: ChargeMode) -> AtomicOp {
        AtomicOp::RefillAndTake {
            now,
            capacity: self.capacity,
            refill_rate: self.refill_rate,
            hits,
            mode,
        }
    }

    fn decide(&self, outcome: &OpOutcome, _now: u64, hits: u64, mode: ChargeMode) -> Decision {
        let tokens = outcome.entry.tokens_or_default();

        let info = RateLimitInfo::new(
            self.limit(),
            (tokens + EPSILON).floor() as u64,
            self.refill_time(self.capacity - tokens),
        )
        .with_algorithm(self.name())
        .with_metadata(DecisionMetadata::new().with_tokens_available(tokens));

        if outcome.allowed {
            return Decision::allowed(info);
        }

        let needed = retry_hits(hits, mode) as f64;
        let retry = if needed > self.capacity {
            self.refill_time(self.capacity)
        } else {
            self.refill_time(needed - tokens)
        };
        Decision::denied(info.with_retry_after(retry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[cfg(feature = "memory")]
    use crate::storage::MemoryStorage;

    #[cfg(feature = "memory")]
    #[tokio::test]
    async fn test_token_bucket_basic() {
        let algorithm = TokenBucket::new(10.0, 1.0);
        let storage = MemoryStorage::new();

        for i in 1..=10 {
            let decision = algorithm.check_and_record(&storage, "user:1", 0).await.unwrap();
            assert!(decision.is_allowed(), "Request {} should be allowed", i);
        }

        let decision = algorithm.check_and_record(&storage, "user:1", 0).await.unwrap();
        assert!(decision.is_denied());
        assert_eq!(decision.retry_after_ms(), 1_000);
    }

    #[cfg(feature = "memory")]
    #[tokio::test]
    async fn test_token_bucket_refill_scenario() {
        let algorithm = TokenBucket::new(5.0, 1.67);
        let storage = MemoryStorage::new();

        for _ in 0..5 {
            assert!(algorithm.check_and_record(&storage, "k", 0).await.unwrap().is_allowed());
        }

        let decision = algorithm.check_and_record(&storage, "k", 0).await.unwrap();
        assert!(decision.is_denied());
        assert_eq!(decision.info().metadata.as_ref().and_then(|m| m.tokens_available), Some(0.0));
        let retry = decision.info().retry_after.unwrap().as_secs_f64();
        assert!((retry - 0.6).abs() < 0.01, "retry_after was {}", retry);

        let decision = algorithm.check_and_record(&storage, "k", 1_000).await.unwrap();
        assert!(decision.is_allowed());
        let tokens = decision.info().metadata.as_ref().and_then(|m| m.tokens_available).unwrap();
        assert!((tokens - 0.67).abs() < 1e-6);
    }

    #[test]
    fn test_tokens_stay_within_bounds() {
        let mut entry: Option<StorageEntry> = None;
        for step in 0..200u64 {
            let now = step * 137 % 5_000;
            let mode = if step % 5 == 0 { ChargeMode::Charge } else { ChargeMode::Strict };
            let outcome = refill_and_take(entry.as_ref(), now, 3.0, 2.5, 1 + step % 3, mode);
            let tokens = outcome.entry.tokens_or_default();
            assert!((0.0..=3.0).contains(&tokens), "tokens out of range: {}", tokens);
            entry = Some(outcome.entry);
        }
    }

    #[test]
    fn test_lagging_clock_does_not_refill() {
        let entry = StorageEntry::with_tokens(0.5, 10_000);
        let outcome = refill_and_take(Some(&entry), 4_000, 5.0, 1.0, 1, ChargeMode::Strict);
        assert!(!outcome.allowed);
        assert_eq!(outcome.entry.tokens, Some(0.5));
        assert_eq!(outcome.entry.last_update, 10_000);
    }

    #[test]
    fn test_try_new_validation() {
        assert!(TokenBucket::try_new(0.0, 1.0).is_err());
        assert!(TokenBucket::try_new(5.0, -1.0).is_err());
        assert!(TokenBucket::try_new(5.0, f64::NAN).is_err());
        assert!(TokenBucket::try_new(5.0, 1.67).is_ok());
    }

    #[test]
    fn test_ttl_is_time_to_full() {
        let algorithm = TokenBucket::new(5.0, 2.0);
        assert_eq!(algorithm.ttl(0, 1), Duration::from_millis(2_500));

        let algorithm = TokenBucket::new(5.0, 1.67);
        let ttl = algorithm.ttl(0, 1).as_secs_f64();
        assert!((ttl - 5.0 / 1.67).abs() < 1e-6);
    }
}
