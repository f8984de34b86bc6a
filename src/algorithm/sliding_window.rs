//! Sliding Window Counter rate limiting algorithm.
//!
//! The window `W` is divided into `k` sub-windows of length `s = ⌈W / k⌉`.
//! Rounding up makes the effective window `k × s` at least `W`.
//! Each key keeps `k + 1` counters, oldest first, the last one counting the
//! sub-window `now` falls in. The oldest counter only partially overlaps the
//! window ending at `now`, so it is weighted by the part still inside:
//!
//! ```text
//! estimate = oldest × (1 − elapsed_in_current_sub_window / s) + Σ newer counters
//! ```
//!
//! With `k = 1` this is the classic `previous × (1 − elapsed / W) + current`.
//! A request is admitted iff `estimate + hits ≤ rate`.

use std::time::Duration;

use crate::algorithm::{retry_hits, Algorithm};
use crate::decision::{Decision, DecisionMetadata, RateLimitInfo};
use crate::error::{ConfigError, Result};
use crate::quota::Quota;
use crate::storage::{AtomicOp, ChargeMode, OpOutcome, StorageEntry};

const EPSILON: f64 = 1e-9;

/// Sliding Window Counter rate limiting algorithm.
///
/// Uses weighted sub-window counters to smooth out the boundary burst of
/// the fixed window while keeping constant memory per key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlidingWindowCounter {
    quota: Quota,
    sub_windows: u32,
}

impl SlidingWindowCounter {
    /// Create a sliding window counter with `sub_windows` sub-windows.
    ///
    /// # Panics
    ///
    /// Panics if the parameters are rejected by [`SlidingWindowCounter::try_new`].
    pub fn new(quota: Quota, sub_windows: u32) -> Self {
        match Self::try_new(quota, sub_windows) {
            Ok(alg) => alg,
            Err(e) => panic!("{}", e),
        }
    }

    /// Create a sliding window counter, validating the sub-window count.
    ///
    /// The count must be at least 1, and each sub-window at least 1ms long.
    pub fn try_new(quota: Quota, sub_windows: u32) -> Result<Self> {
        if sub_windows == 0 {
            return Err(ConfigError::InvalidParameters(
                "sub_window_count must be greater than 0".into(),
            )
            .into());
        }
        if quota.window_ms() < u64::from(sub_windows) {
            return Err(ConfigError::InvalidParameters(format!(
                "window of {}ms cannot be split into {} sub-windows",
                quota.window_ms(),
                sub_windows
            ))
            .into());
        }
        Ok(Self { quota, sub_windows })
    }

    /// The configured quota.
    pub fn quota(&self) -> &Quota {
        &self.quota
    }

    /// Number of sub-windows per window.
    pub fn sub_windows(&self) -> u32 {
        self.sub_windows
    }

    /// Sub-window length in milliseconds, rounded up.
    pub fn slot_ms(&self) -> u64 {
        self.quota.window_ms().div_ceil(u64::from(self.sub_windows))
    }
}

/// Interpolated weighted increment.
///
/// Rolls the counters forward to the sub-window containing `now`, computes
/// the estimate and adds `hits` to the current counter if they fit (or
/// unconditionally in [`ChargeMode::Charge`]). A stored sub-window newer
/// than `now` is kept as is.
pub fn weighted_increment(
    current: Option<&StorageEntry>,
    now: u64,
    slot_ms: u64,
    slots: u32,
    limit: u64,
    hits: u64,
    mode: ChargeMode,
) -> OpOutcome {
    let len = slots as usize + 1;
    let slot_start = (now / slot_ms) * slot_ms;

    let mut start = slot_start;
    let mut buckets = vec![0u64; len];

    if let Some(entry) = current {
        if let Some(stored) = entry.buckets.as_deref().filter(|b| b.len() == len) {
            if entry.window_start >= slot_start {
                start = entry.window_start;
                buckets.copy_from_slice(stored);
            } else {
                let shift = (slot_start - entry.window_start) / slot_ms;
                if shift < len as u64 {
                    let shift = shift as usize;
                    buckets[..len - shift].copy_from_slice(&stored[shift..]);
                }
            }
        }
    }

    let current_estimate = estimate(&buckets, start, now, slot_ms);
    let allowed = current_estimate + hits as f64 <= limit as f64 + EPSILON;

    if allowed || mode == ChargeMode::Charge {
        buckets[len - 1] = buckets[len - 1].saturating_add(hits);
    }

    OpOutcome::new(allowed, StorageEntry::with_buckets(start, buckets))
}

/// Weighted request count of the window ending at `now`.
pub fn estimate(buckets: &[u64], window_start: u64, now: u64, slot_ms: u64) -> f64 {
    let Some((&oldest, newer)) = buckets.split_first() else {
        return 0.0;
    };
    let elapsed = now.saturating_sub(window_start).min(slot_ms) as f64;
    let weight = 1.0 - elapsed / slot_ms as f64;
    oldest as f64 * weight + newer.iter().sum::<u64>() as f64
}

/// Exact time until `hits` more requests fit, assuming no other traffic.
///
/// Walks the sub-window boundaries: while sub-window `j` (counting from the
/// stored one) is current, counter `j` is the decaying oldest and every
/// later counter is fully inside the window. Returns `None` when `hits`
/// exceed the limit and can never be admitted.
pub fn retry_after_ms(
    buckets: &[u64],
    window_start: u64,
    now: u64,
    slot_ms: u64,
    limit: u64,
    hits: u64,
) -> Option<u64> {
    if hits > limit {
        return None;
    }

    let budget = (limit - hits) as f64;
    let slot = slot_ms as f64;

    for j in 0..=buckets.len() {
        let partial = buckets.get(j).copied().unwrap_or(0) as f64;
        let full: u64 = buckets.iter().skip(j + 1).sum();
        let room = budget - full as f64;
        if room < -EPSILON {
            continue;
        }

        let fraction = if partial > 0.0 {
            (1.0 - room.max(0.0) / partial).max(0.0)
        } else {
            0.0
        };
        let at = window_start as f64 + (j as f64 + fraction) * slot;
        return Some((at - now as f64).max(0.0).ceil() as u64);
    }

    None
}

impl Algorithm for SlidingWindowCounter {
    fn name(&self) -> &'static str {
        "sliding_window_counter"
    }

    fn limit(&self) -> u64 {
        self.quota.max_requests()
    }

    fn ttl(&self, _now: u64, _hits: u64) -> Duration {
        Duration::from_millis(self.quota.window_ms() + self.slot_ms())
    }

    fn op(&self, now: u64, hits: u64, mode: ChargeMode) -> AtomicOp {
        AtomicOp::WeightedIncrement {
            now,
            slot_ms: self.slot_ms(),
            slots: self.sub_windows,
            limit: self.limit(),
            hits,
            mode,
        }
    }

    fn decide(&self, outcome: &OpOutcome, now: u64, hits: u64, mode: ChargeMode) -> Decision {
        let slot_ms = self.slot_ms();
        let entry = &outcome.entry;
        let buckets = entry.buckets.as_deref().unwrap_or(&[]);
        let current = estimate(buckets, entry.window_start, now, slot_ms);

        let remaining = (self.limit() as f64 - current + EPSILON).floor().max(0.0) as u64;

        // The state is fresh once the newest non-empty counter has left
        // the window.
        let reset_at = buckets
            .iter()
            .rposition(|&count| count > 0)
            .map(|i| entry.window_start + (i as u64 + 1) * slot_ms)
            .unwrap_or(now);
        let reset_after = Duration::from_millis(reset_at.saturating_sub(now));

        let info = RateLimitInfo::new(self.limit(), remaining, reset_after)
            .with_algorithm(self.name())
            .with_metadata(DecisionMetadata::new().with_estimate(current));

        if outcome.allowed {
            return Decision::allowed(info);
        }

        let retry = retry_after_ms(
            buckets,
            entry.window_start,
            now,
            slot_ms,
            self.limit(),
            retry_hits(hits, mode),
        )
        .map(Duration::from_millis)
        .unwrap_or_else(|| self.quota.window());

        Decision::denied(info.with_retry_after(retry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[cfg(feature = "memory")]
    use crate::storage::MemoryStorage;

    fn strict(
        current: Option<&StorageEntry>,
        now: u64,
        slot_ms: u64,
        slots: u32,
        limit: u64,
    ) -> OpOutcome {
        weighted_increment(current, now, slot_ms, slots, limit, 1, ChargeMode::Strict)
    }

    #[cfg(feature = "memory")]
    #[tokio::test]
    async fn test_sliding_window_basic() {
        let algorithm = SlidingWindowCounter::new(Quota::per_minute(5), 1);
        let storage = MemoryStorage::new();

        for i in 1..=5 {
            let decision = algorithm.check_and_record(&storage, "user:1", 60_000).await.unwrap();
            assert!(decision.is_allowed(), "Request {} should be allowed", i);
        }

        let decision = algorithm.check_and_record(&storage, "user:1", 60_000).await.unwrap();
        assert!(decision.is_denied());
    }

    #[test]
    fn test_previous_window_is_weighted() {
        // 10 requests in the previous minute, a quarter into the current
        // one they still weigh 7.5.
        let entry = StorageEntry::with_buckets(0, vec![0, 10]);
        let outcome = strict(Some(&entry), 75_000, 60_000, 1, 8);

        assert_eq!(outcome.entry.window_start, 60_000);
        assert_eq!(outcome.entry.buckets, Some(vec![10, 0]));
        assert!(!outcome.allowed);

        // Halfway through, the previous minute weighs 5.
        let outcome = strict(Some(&entry), 90_000, 60_000, 1, 8);
        assert!(outcome.allowed);
        assert_eq!(outcome.entry.buckets, Some(vec![10, 1]));
    }

    #[test]
    fn test_counters_expire_after_gap() {
        let entry = StorageEntry::with_buckets(0, vec![4, 4, 4]);
        let outcome = strict(Some(&entry), 100_000, 10_000, 2, 5);
        assert!(outcome.allowed);
        assert_eq!(outcome.entry.buckets, Some(vec![0, 0, 1]));
    }

    #[test]
    fn test_lagging_clock_keeps_newer_slot() {
        let entry = StorageEntry::with_buckets(120_000, vec![0, 3]);
        let outcome = strict(Some(&entry), 70_000, 60_000, 1, 10);
        assert_eq!(outcome.entry.window_start, 120_000);
        assert_eq!(outcome.entry.buckets, Some(vec![0, 4]));
    }

    #[test]
    fn test_charge_mode_records_overflow() {
        let entry = StorageEntry::with_buckets(0, vec![0, 9]);
        let outcome = weighted_increment(Some(&entry), 1_000, 60_000, 1, 10, 3, ChargeMode::Charge);
        assert!(!outcome.allowed);
        assert_eq!(outcome.entry.buckets, Some(vec![0, 12]));
    }

    #[test]
    fn test_retry_after_is_exact() {
        // prev = 10, curr = 0, rate 10: one more request fits once the
        // previous minute's weight drops to 9, i.e. 6s into the window.
        let buckets = [10, 0];
        let retry = retry_after_ms(&buckets, 60_000, 60_000, 60_000, 10, 1);
        assert_eq!(retry, Some(6_000));

        // Current window already full: wait for it to become the previous one
        // and decay by one request.
        let buckets = [0, 10];
        let retry = retry_after_ms(&buckets, 60_000, 90_000, 60_000, 10, 1);
        assert_eq!(retry, Some(36_000));

        assert_eq!(retry_after_ms(&buckets, 60_000, 90_000, 60_000, 10, 11), None);
    }

    #[cfg(feature = "memory")]
    #[tokio::test]
    async fn test_denied_decision_retry_then_allowed() {
        let algorithm = SlidingWindowCounter::new(Quota::per_minute(10), 3);
        let storage = MemoryStorage::new();

        for _ in 0..10 {
            assert!(algorithm.check_and_record(&storage, "k", 5_000).await.unwrap().is_allowed());
        }
        let denied = algorithm.check_and_record(&storage, "k", 5_000).await.unwrap();
        assert!(denied.is_denied());

        let retry = denied.retry_after_ms();
        assert!(retry > 0);
        let early = algorithm.check(&storage, "k", 5_000 + retry - 1).await.unwrap();
        assert!(early.is_denied());
        let decision = algorithm.check_and_record(&storage, "k", 5_000 + retry).await.unwrap();
        assert!(decision.is_allowed());
    }

    #[test]
    fn test_try_new_validation() {
        assert!(SlidingWindowCounter::try_new(Quota::per_minute(10), 0).is_err());
        assert!(SlidingWindowCounter::try_new(Quota::new(10, Duration::from_millis(3)), 4).is_err());
        assert_eq!(SlidingWindowCounter::new(Quota::per_minute(10), 6).slot_ms(), 10_000);
    }

    #[test]
    fn test_uneven_split_never_shrinks_window() {
        let algorithm = SlidingWindowCounter::new(Quota::per_second(10), 3);
        assert_eq!(algorithm.slot_ms(), 334);
        assert!(algorithm.slot_ms() * 3 >= 1_000);
    }

    #[test]
    fn test_ttl_spans_window_and_one_slot() {
        let algorithm = SlidingWindowCounter::new(Quota::per_minute(10), 6);
        assert_eq!(algorithm.ttl(0, 1), Duration::from_millis(70_000));

        let algorithm = SlidingWindowCounter::new(Quota::per_second(10), 3);
        assert_eq!(algorithm.ttl(0, 1), Duration::from_millis(1_334));
    }
}
