//! Fixed Window rate limiting algorithm.
//!
//! Time is cut into aligned windows of length `W`; each key keeps one
//! counter for the window `now` falls in.
//!
//! A caller can spend a full quota at the very end of one window and
//! another full quota at the start of the next, so up to `2 × rate`
//! requests may pass within any `W`-long span straddling a boundary. This is
//! the known trade-off of the algorithm, not a defect.

use std::time::Duration;

use crate::algorithm::Algorithm;
use crate::decision::{Decision, RateLimitInfo};
use crate::quota::Quota;
use crate::storage::{AtomicOp, ChargeMode, OpOutcome, StorageEntry};

/// Fixed Window rate limiting algorithm.
///
/// Simple counter per aligned time window. Cheapest algorithm, but allows
/// bursts of up to twice the rate at window boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedWindow {
    quota: Quota,
}

impl FixedWindow {
    /// Create a fixed window limiter for `quota`.
    pub fn new(quota: Quota) -> Self {
        Self { quota }
    }

    /// The configured quota.
    pub fn quota(&self) -> &Quota {
        &self.quota
    }

    /// Start of the window containing `now`.
    pub fn window_start(&self, now: u64) -> u64 {
        let window_ms = self.quota.window_ms();
        (now / window_ms) * window_ms
    }
}

/// Increment-with-expiry of the window counter.
///
/// A stored window that is newer than `window_start` (a caller with a
/// lagging clock) keeps counting against the stored window. Hits are always
/// charged; the result is allowed iff the new count stays within `limit`.
pub fn increment(
    current: Option<&StorageEntry>,
    window_start: u64,
    limit: u64,
    hits: u64,
) -> OpOutcome {
    let (start, count) = match current {
        Some(entry) if entry.window_start >= window_start => (entry.window_start, entry.count),
        _ => (window_start, 0),
    };

    let count = count.saturating_add(hits);
    OpOutcome::new(count <= limit, StorageEntry::new(count, start))
}

impl Algorithm for FixedWindow {
    fn name(&self) -> &'static str {
        "fixed_window"
    }

    fn limit(&self) -> u64 {
        self.quota.max_requests()
    }

    fn ttl(&self, now: u64, _hits: u64) -> Duration {
        let window_ms = self.quota.window_ms();
        let window_end = self.window_start(now) + window_ms;
        Duration::from_millis(window_end - now + window_ms)
    }

    fn op(&self, now: u64, hits: u64, _mode: ChargeMode) -> AtomicOp {
        AtomicOp::Increment {
            window_start: self.window_start(now),
            limit: self.limit(),
            hits,
        }
    }

    fn decide(&self, outcome: &OpOutcome, now: u64, _hits: u64, _mode: ChargeMode) -> Decision {
        let entry = &outcome.entry;
        let window_end = entry.window_start + self.quota.window_ms();
        let reset_after = Duration::from_millis(window_end.saturating_sub(now));

        let info = RateLimitInfo::new(
            self.limit(),
            self.limit().saturating_sub(entry.count),
            reset_after,
        )
        .with_algorithm(self.name());

        if outcome.allowed {
            Decision::allowed(info)
        } else {
            Decision::denied(info.with_retry_after(reset_after))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[cfg(feature = "memory")]
    use crate::storage::MemoryStorage;

    #[cfg(feature = "memory")]
    #[tokio::test]
    async fn test_fixed_window_basic() {
        let algorithm = FixedWindow::new(Quota::per_minute(5));
        let storage = MemoryStorage::new();

        for i in 1..=5 {
            let decision = algorithm.check_and_record(&storage, "user:1", 1_000).await.unwrap();
            assert!(decision.is_allowed(), "Request {} should be allowed", i);
            assert_eq!(decision.info().remaining, 5 - i);
        }

        let decision = algorithm.check_and_record(&storage, "user:1", 1_000).await.unwrap();
        assert!(decision.is_denied());
        assert_eq!(decision.retry_after_ms(), 59_000);
    }

    #[cfg(feature = "memory")]
    #[tokio::test]
    async fn test_fixed_window_boundary_burst() {
        let algorithm = FixedWindow::new(Quota::per_minute(100));
        let storage = MemoryStorage::new();

        for _ in 0..100 {
            let decision = algorithm.check_and_record(&storage, "edge", 59_900).await.unwrap();
            assert!(decision.is_allowed());
        }
        let decision = algorithm.check_and_record(&storage, "edge", 59_950).await.unwrap();
        assert!(decision.is_denied());
        assert_eq!(decision.retry_after_ms(), 50);

        let decision = algorithm.check_and_record(&storage, "edge", 60_100).await.unwrap();
        assert!(decision.is_allowed());
    }

    #[test]
    fn test_increment_never_moves_window_backwards() {
        let entry = StorageEntry::new(3, 120_000);
        let outcome = increment(Some(&entry), 60_000, 10, 1);
        assert_eq!(outcome.entry.window_start, 120_000);
        assert_eq!(outcome.entry.count, 4);
    }

    #[test]
    fn test_increment_resets_old_window() {
        let entry = StorageEntry::new(10, 0);
        let outcome = increment(Some(&entry), 60_000, 10, 1);
        assert!(outcome.allowed);
        assert_eq!(outcome.entry.count, 1);
        assert_eq!(outcome.entry.window_start, 60_000);
    }

    #[test]
    fn test_ttl_covers_window_end() {
        let algorithm = FixedWindow::new(Quota::per_minute(1));
        assert_eq!(algorithm.ttl(59_000, 1), Duration::from_millis(61_000));
        assert_eq!(algorithm.ttl(60_000, 1), Duration::from_millis(120_000));
    }
}
