//! Sliding Window Log rate limiting algorithm.
//!
//! The Sliding Window Log stores the timestamp of every admitted request
//! within the window, providing the highest accuracy but with memory
//! proportional to the rate.

use std::iter;
use std::time::Duration;

use crate::algorithm::{retry_hits, Algorithm};
use crate::decision::{Decision, RateLimitInfo};
use crate::quota::Quota;
use crate::storage::{AtomicOp, ChargeMode, OpOutcome, StorageEntry};

/// Sliding Window Log rate limiting algorithm.
///
/// Stores timestamp of every request for highest precision.
/// Best for accuracy-critical applications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlidingWindowLog {
    quota: Quota,
}

impl SlidingWindowLog {
    /// Create a sliding window log for `quota`.
    pub fn new(quota: Quota) -> Self {
        Self { quota }
    }

    /// The configured quota.
    pub fn quota(&self) -> &Quota {
        &self.quota
    }
}

/// Prune, count, append.
///
/// Drops every timestamp at or before `now - window_ms`, then appends
/// `hits` copies of `now` if they fit within `limit`. In
/// [`ChargeMode::Charge`] as many as fit are appended, so the log never
/// grows beyond `limit` entries.
pub fn prune_count_append(
    current: Option<&StorageEntry>,
    now: u64,
    window_ms: u64,
    limit: u64,
    hits: u64,
    mode: ChargeMode,
) -> OpOutcome {
    let mut timestamps: Vec<u64> = current
        .map(|entry| {
            entry
                .timestamps_or_empty()
                .iter()
                .copied()
                .filter(|&ts| ts.saturating_add(window_ms) > now)
                .collect()
        })
        .unwrap_or_default();

    let count = timestamps.len() as u64;
    let allowed = count.saturating_add(hits) <= limit;
    let appended = match (allowed, mode) {
        (true, _) => hits,
        (false, ChargeMode::Charge) => limit.saturating_sub(count).min(hits),
        (false, ChargeMode::Strict) => 0,
    };

    // Timestamps from callers with a leading clock stay after `now`.
    let pos = timestamps.partition_point(|&ts| ts <= now);
    timestamps.splice(pos..pos, iter::repeat_n(now, appended as usize));

    OpOutcome::new(allowed, StorageEntry::with_timestamps(timestamps))
}

/// Time until `hits` more requests fit in a log, assuming no other traffic.
///
/// Returns `None` when `hits` exceed the limit.
pub fn retry_after_ms(timestamps: &[u64], now: u64, window_ms: u64, limit: u64, hits: u64) -> Option<u64> {
    if hits > limit {
        return None;
    }
    let excess = (timestamps.len() as u64 + hits).saturating_sub(limit);
    if excess == 0 {
        return Some(0);
    }
    let expiring = timestamps[excess as usize - 1];
    Some((expiring + window_ms).saturating_sub(now))
}

impl Algorithm for SlidingWindowLog {
    fn name(&self) -> &'static str {
        "sliding_window_log"
    }

    fn limit(&self) -> u64 {
        self.quota.max_requests()
    }

    fn ttl(&self, _now: u64, _hits: u64) -> Duration {
        self.quota.window()
    }

    fn op(&self, now: u64, hits: u64, mode: ChargeMode) -> AtomicOp {
        AtomicOp::PruneCountAppend {
            now,
            window_ms: self.quota.window_ms(),
            limit: self.limit(),
            hits,
            mode,
        }
    }

    fn decide(&self, outcome: &OpOutcome, now: u64, hits: u64, mode: ChargeMode) -> Decision {
        let window_ms = self.quota.window_ms();
        let timestamps = outcome.entry.timestamps_or_empty();

        let reset_after = timestamps
            .last()
            .map(|&newest| Duration::from_millis((newest + window_ms).saturating_sub(now)))
            .unwrap_or(Duration::ZERO);

        let info = RateLimitInfo::new(
            self.limit(),
            self.limit().saturating_sub(timestamps.len() as u64),
            reset_after,
        )
        .with_algorithm(self.name());

        if outcome.allowed {
            return Decision::allowed(info);
        }

        let retry = retry_after_ms(timestamps, now, window_ms, self.limit(), retry_hits(hits, mode))
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.quota.window());
        Decision::denied(info.with_retry_after(retry))
    }
}
