//! GCRA (Generic Cell Rate Algorithm) implementation.
//!
//! GCRA is an efficient rate limiting algorithm that tracks a Theoretical Arrival Time (TAT)
//! instead of counters. It's known for:
//! - Low memory usage (only one timestamp per key)
//! - Precise control over request spacing
//! - Excellent burst handling with even distribution
//!
//! # How It Works
//!
//! Instead of counting requests in a window, GCRA tracks when the next request
//! is theoretically allowed (TAT - Theoretical Arrival Time). With emission
//! interval `T = period / rate` and burst tolerance `τ = burst × T`, a
//! request is admitted iff `now ≥ TAT − τ`, and an admitted request moves
//! the TAT to `max(TAT, now) + T`.
//!
//! ```text
//! Period: 100ms between requests (10/sec)
//! Burst: 3 requests allowed ahead (τ = 300ms)
//!
//! Time 0ms:   TAT = 0,   0 ≥ 0 - 300.    ALLOWED, TAT = 100
//! Time 10ms:  TAT = 100, 10 ≥ 100 - 300. ALLOWED, TAT = 200
//! Time 20ms:  TAT = 200, 20 ≥ 200 - 300. ALLOWED, TAT = 300
//! Time 30ms:  TAT = 300, 30 ≥ 300 - 300. ALLOWED, TAT = 400
//! Time 40ms:  TAT = 400, 40 < 400 - 300. DENIED, retry after 60ms
//! Time 350ms: TAT = 400, 350 ≥ 100.      ALLOWED, TAT = 500
//! ```
//!
//! # Resolution
//!
//! The TAT and `T` are kept in microseconds, with `T` rounded up, so rates
//! that do not divide the period and rates above one request per
//! millisecond are both honoured. Callers pass `now` in milliseconds; a
//! request at `now` is taken to arrive somewhere in `[now, now + 1ms)`.

use std::time::Duration;

use crate::algorithm::{retry_hits, Algorithm};
use crate::decision::{Decision, DecisionMetadata, RateLimitInfo};
use crate::quota::Quota;
use crate::storage::{AtomicOp, ChargeMode, OpOutcome, StorageEntry};

/// GCRA (Generic Cell Rate Algorithm) rate limiter.
///
/// This is the recommended algorithm for most use cases, offering:
/// - Precise rate control with even request spacing
/// - Low memory usage
/// - Excellent burst handling
/// - Clear "retry after" semantics
///
/// # Example
///
/// ```ignore
/// use admitgate::{Algorithm, GCRA, Quota, MemoryStorage};
///
/// // 10 per second, 5 more allowed ahead of schedule
/// let algorithm = GCRA::new(Quota::per_second(10), 5);
/// let storage = MemoryStorage::new();
///
/// let decision = algorithm.check_and_record(&storage, "user:123", now).await?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GCRA {
    quota: Quota,
    burst: u64,
}

impl GCRA {
    /// Create a GCRA limiter emitting `quota` with `burst` requests of
    /// tolerance.
    pub fn new(quota: Quota, burst: u64) -> Self {
        Self { quota, burst }
    }

    /// The configured quota.
    pub fn quota(&self) -> &Quota {
        &self.quota
    }

    /// Requests allowed ahead of the steady rate.
    pub fn burst(&self) -> u64 {
        self.burst
    }

    /// Emission interval `T` in microseconds.
    pub fn emission_interval_us(&self) -> u64 {
        self.quota.emission_interval_us()
    }

    /// Burst tolerance `τ` in microseconds.
    pub fn tolerance_us(&self) -> u64 {
        self.burst.saturating_mul(self.emission_interval_us())
    }
}

/// Microseconds per millisecond tick.
const TICK_US: u64 = 1_000;

/// Latest arrival, in microseconds, still admitted at millisecond `now`.
fn horizon_us(now: u64, tolerance_us: u64) -> u64 {
    now.saturating_mul(TICK_US)
        .saturating_add(tolerance_us)
        .saturating_add(TICK_US - 1)
}

/// Compare-and-advance of the theoretical arrival time.
///
/// `now` is in milliseconds; the stored TAT, `emission_us` and
/// `tolerance_us` are in microseconds. The TAT never moves backwards: a
/// denied request in [`ChargeMode::Strict`] leaves it untouched, everything
/// else advances it by `hits × T` from `max(TAT, now)`.
pub fn advance_tat(
    current: Option<&StorageEntry>,
    now: u64,
    emission_us: u64,
    tolerance_us: u64,
    hits: u64,
    mode: ChargeMode,
) -> OpOutcome {
    let now_us = now.saturating_mul(TICK_US);
    let tat = current.and_then(|entry| entry.tat).unwrap_or(now_us);
    let base = tat.max(now_us);

    // The last of the `hits` requests is scheduled at base + (hits - 1)T.
    let last_arrival = base.saturating_add(emission_us.saturating_mul(hits.saturating_sub(1)));
    let allowed = last_arrival <= horizon_us(now, tolerance_us);

    let stored = if allowed || mode == ChargeMode::Charge {
        base.saturating_add(emission_us.saturating_mul(hits))
    } else {
        tat
    };

    OpOutcome::new(allowed, StorageEntry::with_tat(stored).set_last_update(now))
}

impl Algorithm for GCRA {
    fn name(&self) -> &'static str {
        "gcra"
    }

    fn limit(&self) -> u64 {
        self.burst.saturating_add(1)
    }

    fn ttl(&self, _now: u64, hits: u64) -> Duration {
        let ttl_us = self
            .tolerance_us()
            .saturating_add(self.emission_interval_us().saturating_mul(hits.saturating_add(1)));
        Duration::from_millis(ttl_us.div_ceil(TICK_US))
    }

    fn op(&self, now: u64, hits: u64, mode: ChargeMode) -> AtomicOp {
        AtomicOp::AdvanceTat {
            now,
            emission_us: self.emission_interval_us(),
            tolerance_us: self.tolerance_us(),
            hits,
            mode,
        }
    }

    fn decide(&self, outcome: &OpOutcome, now: u64, hits: u64, mode: ChargeMode) -> Decision {
        let emission_us = self.emission_interval_us();
        let tolerance_us = self.tolerance_us();
        let now_us = now.saturating_mul(TICK_US);
        let tat = outcome.entry.tat_or_default();
        let tat_ms = tat.div_ceil(TICK_US);

        // How many more requests fit before the next one would land beyond
        // the horizon.
        let base = tat.max(now_us);
        let horizon = horizon_us(now, tolerance_us);
        let remaining = if base <= horizon {
            ((horizon - base) / emission_us + 1).min(self.limit())
        } else {
            0
        };

        let info = RateLimitInfo::new(
            self.limit(),
            remaining,
            Duration::from_millis(tat_ms.saturating_sub(now)),
        )
        .with_algorithm(self.name())
        .with_metadata(DecisionMetadata::new().with_tat(tat_ms));

        if outcome.allowed {
            return Decision::allowed(info);
        }

        let wanted = retry_hits(hits, mode);
        let retry = if wanted > self.limit() {
            self.quota.window()
        } else {
            // First tick whose horizon reaches the last arrival.
            let last_arrival = tat.saturating_add(emission_us.saturating_mul(wanted - 1));
            let admit_at = last_arrival
                .saturating_sub(tolerance_us + TICK_US - 1)
                .div_ceil(TICK_US);
            Duration::from_millis(admit_at.saturating_sub(now))
        };
        Decision::denied(info.with_retry_after(retry))
    }
}
