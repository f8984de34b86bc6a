//! In-memory storage with automatic garbage collection.
//!
//! This storage backend uses `DashMap` for thread-safe concurrent access
//! and includes configurable garbage collection to prevent memory growth.
//! Atomic operations run while holding the write lock of the key's shard,
//! so concurrent callers in the same process never observe a torn state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::Result;
use crate::storage::{current_timestamp_ms, AtomicOp, OpOutcome, Storage, StorageEntry};

/// Garbage collection interval configuration.
#[derive(Debug, Clone)]
pub enum GcInterval {
    /// Run GC every N requests.
    Requests(u64),
    /// Run GC at fixed time intervals (requires a Tokio runtime).
    Duration(Duration),
    /// Disable automatic GC.
    Manual,
}

impl Default for GcInterval {
    fn default() -> Self {
        Self::Requests(10000)
    }
}

/// Garbage collection configuration.
#[derive(Debug, Clone, Default)]
pub struct GcConfig {
    /// When to trigger GC.
    pub interval: GcInterval,
}

impl GcConfig {
    /// Create config with request-based GC.
    pub fn on_requests(count: u64) -> Self {
        Self {
            interval: GcInterval::Requests(count),
        }
    }

    /// Create config with time-based GC.
    pub fn on_duration(interval: Duration) -> Self {
        Self {
            interval: GcInterval::Duration(interval),
        }
    }

    /// Create config with manual GC only.
    pub fn manual() -> Self {
        Self {
            interval: GcInterval::Manual,
        }
    }
}

/// Internal entry with expiration tracking.
#[derive(Debug, Clone)]
struct InternalEntry {
    entry: StorageEntry,
    expires_at: u64,
}

impl InternalEntry {
    fn live(&self, now: u64) -> Option<&StorageEntry> {
        (self.expires_at > now).then_some(&self.entry)
    }
}

/// In-memory storage with garbage collection.
///
/// Expired entries are invisible to reads immediately and are physically
/// removed by the garbage collector.
///
/// # Example
///
/// ```ignore
/// use admitgate::storage::{MemoryStorage, GcConfig};
/// use std::time::Duration;
///
/// // Default GC (every 10000 requests)
/// let storage = MemoryStorage::new();
///
/// // Custom GC interval
/// let storage = MemoryStorage::with_gc(GcConfig::on_duration(Duration::from_secs(60)));
///
/// // Manual GC only
/// let storage = MemoryStorage::with_gc(GcConfig::manual());
/// storage.run_gc();
/// ```
pub struct MemoryStorage {
    data: Arc<DashMap<String, InternalEntry>>,
    gc_config: GcConfig,
    request_count: AtomicU64,
    gc_lock: Mutex<()>,
    shutdown: Arc<Notify>,
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("entries", &self.data.len())
            .field("gc_config", &self.gc_config)
            .finish()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    /// Create a new memory storage with default GC configuration.
    pub fn new() -> Self {
        Self::with_gc(GcConfig::default())
    }

    /// Create a new memory storage with custom GC configuration.
    pub fn with_gc(gc_config: GcConfig) -> Self {
        let storage = Self {
            data: Arc::new(DashMap::new()),
            gc_config: gc_config.clone(),
            request_count: AtomicU64::new(0),
            gc_lock: Mutex::new(()),
            shutdown: Arc::new(Notify::new()),
        };

        if let GcInterval::Duration(interval) = gc_config.interval {
            storage.start_gc_task(interval);
        }

        storage
    }

    /// Start background GC task.
    fn start_gc_task(&self, interval: Duration) {
        let data = Arc::clone(&self.data);
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        let removed = run_gc_on_map(&data);
                        tracing::trace!(removed, "memory storage gc pass");
                    }
                    _ = shutdown.notified() => {
                        break;
                    }
                }
            }
        });
    }

    /// Manually trigger garbage collection.
    ///
    /// Returns the number of expired entries removed.
    pub fn run_gc(&self) -> usize {
        run_gc_on_map(&self.data)
    }

    /// Get the number of entries currently stored (including expired
    /// entries not yet collected).
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the storage is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Clear all entries.
    pub fn clear(&self) {
        self.data.clear();
    }

    /// Check if GC should run and run it if needed.
    fn maybe_run_gc(&self) {
        if let GcInterval::Requests(threshold) = self.gc_config.interval {
            let count = self.request_count.fetch_add(1, Ordering::Relaxed);
            if threshold > 0 && count % threshold == 0 && count > 0 {
                // Another caller is already collecting.
                if let Some(_guard) = self.gc_lock.try_lock() {
                    run_gc_on_map(&self.data);
                }
            }
        }
    }
}

impl Drop for MemoryStorage {
    fn drop(&mut self) {
        self.shutdown.notify_waiters();
    }
}

/// Remove expired entries, returning how many were removed.
fn run_gc_on_map(data: &DashMap<String, InternalEntry>) -> usize {
    let now = current_timestamp_ms();
    let before = data.len();
    data.retain(|_, entry| entry.expires_at > now);
    before.saturating_sub(data.len())
}

impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<StorageEntry>> {
        self.maybe_run_gc();

        let now = current_timestamp_ms();
        if let Some(internal) = self.data.get(key) {
            if let Some(entry) = internal.live(now) {
                return Ok(Some(entry.clone()));
            }
            drop(internal);
            self.data.remove_if(key, |_, e| e.expires_at <= now);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, entry: StorageEntry, ttl: Duration) -> Result<()> {
        self.maybe_run_gc();

        let expires_at = current_timestamp_ms() + ttl.as_millis() as u64;
        self.data
            .insert(key.to_string(), InternalEntry { entry, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.data.remove(key);
        Ok(())
    }

    async fn apply(&self, key: &str, op: AtomicOp, ttl: Duration) -> Result<OpOutcome> {
        self.maybe_run_gc();

        let now = current_timestamp_ms();
        let expires_at = now + ttl.as_millis() as u64;

        // The entry guard holds the shard write lock until the new state
        // is stored.
        let outcome = match self.data.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let outcome = op.apply(occupied.get().live(now));
                occupied.insert(InternalEntry {
                    entry: outcome.entry.clone(),
                    expires_at,
                });
                outcome
            }
            Entry::Vacant(vacant) => {
                let outcome = op.apply(None);
                vacant.insert(InternalEntry {
                    entry: outcome.entry.clone(),
                    expires_at,
                });
                outcome
            }
        };

        Ok(outcome)
    }
}
