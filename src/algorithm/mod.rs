//! Rate limiting algorithm trait and implementations.
//!
//! This module defines the `Algorithm` trait and provides implementations
//! for the supported admission strategies.
//!
//! # Available Algorithms
//!
//! - **Fixed Window**: Simple counter per time window
//! - **Sliding Window Counter**: Weighted sub-window counters
//! - **Sliding Window Log**: High precision, stores all timestamps
//! - **GCRA**: Generic Cell Rate Algorithm - precise, low memory
//! - **Token Bucket**: Controlled bursts with refilling tokens
//!
//! Every algorithm is split in two halves. The state transition is a pure
//! function in the algorithm's module (for example
//! [`gcra::advance_tat`]); the store runs it atomically through
//! [`AtomicOp`]. The [`Algorithm`] implementation builds the operation and
//! turns its outcome into a [`Decision`].

mod batched;
pub mod fixed_window;
pub mod gcra;
pub mod sliding_log;
pub mod sliding_window;
pub mod token_bucket;

pub use batched::{batch_size, BatchedAdmission};
pub use fixed_window::FixedWindow;
pub use gcra::GCRA;
pub use sliding_log::SlidingWindowLog;
pub use sliding_window::SlidingWindowCounter;
pub use token_bucket::TokenBucket;

use std::future::Future;
use std::time::Duration;

use crate::decision::Decision;
use crate::error::{ConfigError, Result};
use crate::storage::{AtomicOp, ChargeMode, OpOutcome, Storage};

/// Rate limiting algorithm trait.
///
/// Each algorithm provides different trade-offs between accuracy, memory usage,
/// and burst handling. All implementations must be thread-safe.
///
/// Timestamps are Unix milliseconds and are passed in by the caller, so a
/// decision is a function of the stored state, the parameters and `now`.
///
/// # Algorithm Comparison
///
/// | Algorithm | Accuracy | Memory | Burst | Best For |
/// |-----------|----------|--------|-------|----------|
/// | GCRA | Highest | Low (1 timestamp) | Controlled | Precise rate control |
/// | Token Bucket | High | Low | Excellent | Bursty traffic |
/// | Sliding Window Log | Highest | High | Good | Precision critical |
/// | Sliding Window Counter | High | Low (k+1 counters) | Good | General purpose |
/// | Fixed Window | Low (2x at boundaries) | Low | Poor | Simple use cases |
pub trait Algorithm: Send + Sync + 'static {
    /// Get the algorithm name (for logging/headers).
    fn name(&self) -> &'static str;

    /// Maximum requests admitted without waiting.
    fn limit(&self) -> u64;

    /// How long an idle key's state must be kept.
    fn ttl(&self, now: u64, hits: u64) -> Duration;

    /// Build the atomic store operation for `hits` requests at `now`.
    fn op(&self, now: u64, hits: u64, mode: ChargeMode) -> AtomicOp;

    /// Turn the outcome of [`Algorithm::op`] into a decision.
    fn decide(&self, outcome: &OpOutcome, now: u64, hits: u64, mode: ChargeMode) -> Decision;

    /// Run one atomic admission of `hits` requests against the store.
    fn acquire<S: Storage>(
        &self,
        storage: &S,
        key: &str,
        now: u64,
        hits: u64,
        mode: ChargeMode,
    ) -> impl Future<Output = Result<Decision>> + Send {
        async move {
            let op = self.op(now, hits, mode);
            let outcome = storage.apply(key, op, self.ttl(now, hits)).await?;
            Ok(self.decide(&outcome, now, hits, mode))
        }
    }

    /// Check if a request is allowed AND record it atomically.
    ///
    /// This is the primary method for rate limiting. It checks whether the
    /// request should be allowed and, if so, records it against the quota.
    fn check_and_record<S: Storage>(
        &self,
        storage: &S,
        key: &str,
        now: u64,
    ) -> impl Future<Output = Result<Decision>> + Send {
        self.acquire(storage, key, now, 1, ChargeMode::Strict)
    }

    /// Check without recording (peek at current state).
    ///
    /// Returns the decision a request at `now` would get, leaving the
    /// stored state untouched.
    fn check<S: Storage>(
        &self,
        storage: &S,
        key: &str,
        now: u64,
    ) -> impl Future<Output = Result<Decision>> + Send {
        async move {
            let current = storage.get(key).await?;
            let outcome = self
                .op(now, 1, ChargeMode::Strict)
                .apply(current.as_ref());
            Ok(self.decide(&outcome, now, 1, ChargeMode::Strict))
        }
    }

    /// Reset the rate limit for a key.
    fn reset<S: Storage>(&self, storage: &S, key: &str) -> impl Future<Output = Result<()>> + Send {
        async move { storage.delete(key).await }
    }
}

/// Kind of algorithm, as named in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmKind {
    /// Fixed window counter.
    #[serde(alias = "fixed_window_counter")]
    FixedWindow,
    /// Sliding window counter.
    SlidingWindowCounter,
    /// Sliding window log.
    #[serde(alias = "sliding_window_logs")]
    SlidingWindowLog,
    /// Generic cell rate algorithm.
    Gcra,
    /// Token bucket.
    TokenBucket,
}

impl AlgorithmKind {
    /// Configuration name of the algorithm.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FixedWindow => "fixed_window",
            Self::SlidingWindowCounter => "sliding_window_counter",
            Self::SlidingWindowLog => "sliding_window_log",
            Self::Gcra => "gcra",
            Self::TokenBucket => "token_bucket",
        }
    }
}

impl std::str::FromStr for AlgorithmKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "fixed_window" | "fixed_window_counter" => Ok(Self::FixedWindow),
            "sliding_window_counter" => Ok(Self::SlidingWindowCounter),
            "sliding_window_log" | "sliding_window_logs" => Ok(Self::SlidingWindowLog),
            "gcra" => Ok(Self::Gcra),
            "token_bucket" => Ok(Self::TokenBucket),
            other => Err(ConfigError::UnknownVariant(format!(
                "unknown algorithm '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated algorithm with its parameters.
///
/// Built once per route and dispatched by variant.
#[derive(Debug, Clone, PartialEq)]
pub enum AlgorithmConfig {
    /// Fixed window counter.
    FixedWindow(FixedWindow),
    /// Sliding window counter.
    SlidingWindowCounter(SlidingWindowCounter),
    /// Sliding window log.
    SlidingWindowLog(SlidingWindowLog),
    /// Generic cell rate algorithm.
    Gcra(GCRA),
    /// Token bucket.
    TokenBucket(TokenBucket),
}

impl AlgorithmConfig {
    /// The algorithm kind.
    pub fn kind(&self) -> AlgorithmKind {
        match self {
            Self::FixedWindow(_) => AlgorithmKind::FixedWindow,
            Self::SlidingWindowCounter(_) => AlgorithmKind::SlidingWindowCounter,
            Self::SlidingWindowLog(_) => AlgorithmKind::SlidingWindowLog,
            Self::Gcra(_) => AlgorithmKind::Gcra,
            Self::TokenBucket(_) => AlgorithmKind::TokenBucket,
        }
    }
}

macro_rules! dispatch {
    ($self:ident, $alg:ident => $body:expr) => {
        match $self {
            AlgorithmConfig::FixedWindow($alg) => $body,
            AlgorithmConfig::SlidingWindowCounter($alg) => $body,
            AlgorithmConfig::SlidingWindowLog($alg) => $body,
            AlgorithmConfig::Gcra($alg) => $body,
            AlgorithmConfig::TokenBucket($alg) => $body,
        }
    };
}

impl Algorithm for AlgorithmConfig {
    fn name(&self) -> &'static str {
        dispatch!(self, alg => alg.name())
    }

    fn limit(&self) -> u64 {
        dispatch!(self, alg => alg.limit())
    }

    fn ttl(&self, now: u64, hits: u64) -> Duration {
        dispatch!(self, alg => alg.ttl(now, hits))
    }

    fn op(&self, now: u64, hits: u64, mode: ChargeMode) -> AtomicOp {
        dispatch!(self, alg => alg.op(now, hits, mode))
    }

    fn decide(&self, outcome: &OpOutcome, now: u64, hits: u64, mode: ChargeMode) -> Decision {
        dispatch!(self, alg => alg.decide(outcome, now, hits, mode))
    }
}

impl From<FixedWindow> for AlgorithmConfig {
    fn from(alg: FixedWindow) -> Self {
        Self::FixedWindow(alg)
    }
}

impl From<SlidingWindowCounter> for AlgorithmConfig {
    fn from(alg: SlidingWindowCounter) -> Self {
        Self::SlidingWindowCounter(alg)
    }
}

impl From<SlidingWindowLog> for AlgorithmConfig {
    fn from(alg: SlidingWindowLog) -> Self {
        Self::SlidingWindowLog(alg)
    }
}

impl From<GCRA> for AlgorithmConfig {
    fn from(alg: GCRA) -> Self {
        Self::Gcra(alg)
    }
}

impl From<TokenBucket> for AlgorithmConfig {
    fn from(alg: TokenBucket) -> Self {
        Self::TokenBucket(alg)
    }
}

/// Number of requests a retry estimate is computed for.
///
/// After a charge the caller has already been admitted, so the estimate is
/// for the next single request.
pub(crate) fn retry_hits(hits: u64, mode: ChargeMode) -> u64 {
    match mode {
        ChargeMode::Strict => hits.max(1),
        ChargeMode::Charge => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::Quota;
    #[cfg(feature = "memory")]
    use crate::storage::MemoryStorage;

    #[cfg(feature = "memory")]
    #[tokio::test]
    async fn test_config_dispatch() {
        let storage = MemoryStorage::new();
        let config: AlgorithmConfig = GCRA::new(Quota::per_second(10), 2).into();

        assert_eq!(config.name(), "gcra");
        assert_eq!(config.kind(), AlgorithmKind::Gcra);
        assert_eq!(config.limit(), 3);

        for _ in 0..3 {
            let decision = config.check_and_record(&storage, "k", 1_000).await.unwrap();
            assert!(decision.is_allowed());
        }
        let decision = config.check_and_record(&storage, "k", 1_000).await.unwrap();
        assert!(decision.is_denied());
    }

    #[cfg(feature = "memory")]
    #[tokio::test]
    async fn test_check_does_not_record() {
        let storage = MemoryStorage::new();
        let config: AlgorithmConfig = FixedWindow::new(Quota::per_minute(1)).into();

        for _ in 0..5 {
            let decision = config.check(&storage, "peek", 1_000).await.unwrap();
            assert!(decision.is_allowed());
        }
        assert!(storage.get("peek").await.unwrap().is_none());

        let decision = config.check_and_record(&storage, "peek", 1_000).await.unwrap();
        assert!(decision.is_allowed());
        let decision = config.check(&storage, "peek", 1_000).await.unwrap();
        assert!(decision.is_denied());
    }

    #[cfg(feature = "memory")]
    #[tokio::test]
    async fn test_reset_clears_state() {
        let storage = MemoryStorage::new();
        let config: AlgorithmConfig = SlidingWindowLog::new(Quota::per_minute(1)).into();

        assert!(config.check_and_record(&storage, "r", 1_000).await.unwrap().is_allowed());
        assert!(config.check_and_record(&storage, "r", 1_000).await.unwrap().is_denied());

        config.reset(&storage, "r").await.unwrap();
        assert!(config.check_and_record(&storage, "r", 1_000).await.unwrap().is_allowed());
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(AlgorithmKind::SlidingWindowLog.to_string(), "sliding_window_log");
        let kind: AlgorithmKind = serde_json::from_str("\"fixed_window_counter\"").unwrap();
        assert_eq!(kind, AlgorithmKind::FixedWindow);
        assert_eq!("sliding_window_logs".parse::<AlgorithmKind>().unwrap(), AlgorithmKind::SlidingWindowLog);
        assert!("leaky_bucket".parse::<AlgorithmKind>().is_err());
    }
}
