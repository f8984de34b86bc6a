//! Atomic store operations.
//!
//! The store protocol has exactly one atomic operation per algorithm
//! family. An [`AtomicOp`] describes the operation and its arguments; a
//! backend runs it as a single read-modify-write on one key. The in-memory
//! backend evaluates [`AtomicOp::apply`] under the key's shard lock, the
//! Redis backend runs an equivalent Lua script server-side.
//!
//! `apply` is the reference semantics: it is a pure function of the
//! current entry and the operation's arguments, and it delegates to the
//! state transition each algorithm module defines.

use crate::algorithm::{fixed_window, gcra, sliding_log, sliding_window, token_bucket};
use crate::storage::StorageEntry;

/// How an operation treats hits that do not fit in the remaining quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeMode {
    /// All-or-nothing: record the hits only if they all fit.
    Strict,
    /// Record the hits even when they exceed the quota, as far as the
    /// state's invariants allow, and report the overflow as a denial.
    ///
    /// Used to reconcile requests that were already admitted locally.
    Charge,
}

impl ChargeMode {
    /// Numeric encoding used as a script argument.
    pub fn as_flag(&self) -> u8 {
        match self {
            Self::Strict => 0,
            Self::Charge => 1,
        }
    }
}

/// One atomic read-modify-write against a single key.
#[derive(Debug, Clone, PartialEq)]
pub enum AtomicOp {
    /// Fixed window: increment-with-expiry of the window counter.
    Increment {
        /// Start of the window `now` falls in.
        window_start: u64,
        /// Maximum count admitted per window.
        limit: u64,
        /// Requests to add.
        hits: u64,
    },

    /// Sliding window counter: interpolated weighted increment.
    WeightedIncrement {
        /// Current time (Unix milliseconds).
        now: u64,
        /// Sub-window length in milliseconds.
        slot_ms: u64,
        /// Number of sub-windows per window.
        slots: u32,
        /// Maximum estimated count per window.
        limit: u64,
        /// Requests to add.
        hits: u64,
        /// Overflow handling.
        mode: ChargeMode,
    },

    /// Sliding window log: prune, count, append.
    PruneCountAppend {
        /// Current time (Unix milliseconds).
        now: u64,
        /// Lookback horizon in milliseconds.
        window_ms: u64,
        /// Maximum entries in the horizon.
        limit: u64,
        /// Requests to add.
        hits: u64,
        /// Overflow handling.
        mode: ChargeMode,
    },

    /// GCRA: compare-and-advance of the theoretical arrival time.
    AdvanceTat {
        /// Current time (Unix milliseconds).
        now: u64,
        /// Emission interval `T` in microseconds.
        emission_us: u64,
        /// Burst tolerance `τ` in microseconds.
        tolerance_us: u64,
        /// Requests to add.
        hits: u64,
        /// Overflow handling.
        mode: ChargeMode,
    },

    /// Token bucket: refill, then decrement.
    RefillAndTake {
        /// Current time (Unix milliseconds).
        now: u64,
        /// Bucket capacity.
        capacity: f64,
        /// Tokens added per second.
        refill_rate: f64,
        /// Tokens to take.
        hits: u64,
        /// Overflow handling.
        mode: ChargeMode,
    },
}

/// Result of an atomic operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OpOutcome {
    /// Whether the hits fit in the quota.
    pub allowed: bool,
    /// The state stored after the operation.
    pub entry: StorageEntry,
}

impl OpOutcome {
    /// Create a new outcome.
    pub fn new(allowed: bool, entry: StorageEntry) -> Self {
        Self { allowed, entry }
    }
}

impl AtomicOp {
    /// Short name of the operation (used in logs and script lookup).
    pub fn name(&self) -> &'static str {
        match self {
            Self::Increment { .. } => "increment",
            Self::WeightedIncrement { .. } => "weighted_increment",
            Self::PruneCountAppend { .. } => "prune_count_append",
            Self::AdvanceTat { .. } => "advance_tat",
            Self::RefillAndTake { .. } => "refill_and_take",
        }
    }

    /// Evaluate the operation against the current entry.
    ///
    /// `current` is `None` when the key does not exist or has expired.
    pub fn apply(&self, current: Option<&StorageEntry>) -> OpOutcome {
        match *self {
            Self::Increment {
                window_start,
                limit,
                hits,
            } => fixed_window::increment(current, window_start, limit, hits),
            Self::WeightedIncrement {
                now,
                slot_ms,
                slots,
                limit,
                hits,
                mode,
            } => sliding_window::weighted_increment(current, now, slot_ms, slots, limit, hits, mode),
            Self::PruneCountAppend {
                now,
                window_ms,
                limit,
                hits,
                mode,
            } => sliding_log::prune_count_append(current, now, window_ms, limit, hits, mode),
            Self::AdvanceTat {
                now,
                emission_us,
                tolerance_us,
                hits,
                mode,
            } => gcra::advance_tat(current, now, emission_us, tolerance_us, hits, mode),
            Self::RefillAndTake {
                now,
                capacity,
                refill_rate,
                hits,
                mode,
            } => token_bucket::refill_and_take(current, now, capacity, refill_rate, hits, mode),
        }
    }
}
