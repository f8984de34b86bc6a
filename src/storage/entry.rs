//! Storage entry type for rate limiting state.

use serde::{Deserialize, Serialize};

/// Entry stored in the counter store.
///
/// One entry holds the state of one key. Which fields are populated depends
/// on the algorithm that owns the key:
///
/// | Algorithm | Fields |
/// |-----------|--------|
/// | Fixed window | `window_start`, `count` |
/// | Sliding window counter | `window_start`, `buckets` |
/// | Sliding window log | `timestamps` |
/// | GCRA | `tat` |
/// | Token bucket | `tokens`, `last_update` |
///
/// The Redis backend stores the JSON encoding of this struct, and its Lua
/// scripts read and write the same field names.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageEntry {
    /// Request count (fixed window).
    pub count: u64,

    /// Start of the current window or sub-window (Unix milliseconds).
    pub window_start: u64,

    /// Theoretical Arrival Time for GCRA (Unix microseconds).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tat: Option<u64>,

    /// Available tokens (token bucket).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<f64>,

    /// Last update timestamp (Unix milliseconds).
    pub last_update: u64,

    /// Sub-window counts, oldest first, the last one being the current
    /// sub-window (sliding window counter).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buckets: Option<Vec<u64>>,

    /// Sorted admission timestamps (sliding window log).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamps: Option<Vec<u64>>,
}

impl StorageEntry {
    /// Create a new storage entry for window-based algorithms.
    pub fn new(count: u64, window_start: u64) -> Self {
        Self {
            count,
            window_start,
            last_update: window_start,
            ..Default::default()
        }
    }

    /// Create a storage entry for GCRA algorithm.
    pub fn with_tat(tat: u64) -> Self {
        Self {
            tat: Some(tat),
            ..Default::default()
        }
    }

    /// Create a storage entry for token bucket.
    pub fn with_tokens(tokens: f64, last_update: u64) -> Self {
        Self {
            tokens: Some(tokens),
            last_update,
            ..Default::default()
        }
    }

    /// Create a storage entry for the sliding window counter.
    pub fn with_buckets(window_start: u64, buckets: Vec<u64>) -> Self {
        Self {
            window_start,
            last_update: window_start,
            buckets: Some(buckets),
            ..Default::default()
        }
    }

    /// Create a storage entry for sliding log.
    pub fn with_timestamps(timestamps: Vec<u64>) -> Self {
        let newest = timestamps.last().copied().unwrap_or(0);
        Self {
            count: timestamps.len() as u64,
            window_start: timestamps.first().copied().unwrap_or(0),
            last_update: newest,
            timestamps: Some(timestamps),
            ..Default::default()
        }
    }

    /// Set the last update timestamp.
    pub fn set_last_update(mut self, last_update: u64) -> Self {
        self.last_update = last_update;
        self
    }

    /// Get tokens, defaulting to 0.0 if not set.
    pub fn tokens_or_default(&self) -> f64 {
        self.tokens.unwrap_or(0.0)
    }

    /// Get TAT, defaulting to 0 if not set.
    pub fn tat_or_default(&self) -> u64 {
        self.tat.unwrap_or(0)
    }

    /// Logged timestamps, empty if none.
    pub fn timestamps_or_empty(&self) -> &[u64] {
        self.timestamps.as_deref().unwrap_or(&[])
    }
}
