//! Counter store trait and implementations.
//!
//! This module defines the `Storage` trait that all counter stores must
//! implement, along with built-in implementations for in-memory and Redis
//! storage.

mod entry;
#[cfg(feature = "memory")]
mod memory_gc;
pub mod ops;
#[cfg(feature = "redis")]
mod redis;
#[cfg(feature = "redis")]
mod scripts;

pub use entry::StorageEntry;
pub use ops::{AtomicOp, ChargeMode, OpOutcome};

#[cfg(feature = "memory")]
pub use memory_gc::{GcConfig, GcInterval, MemoryStorage};

#[cfg(feature = "redis")]
pub use self::redis::{RedisConfig, RedisStorage};

use std::future::Future;
use std::time::Duration;

use crate::error::Result;

/// Counter store backend for rate limiting state.
///
/// All storage operations are async to support both local and distributed
/// backends. Implementations must be thread-safe (`Send + Sync`).
///
/// # Atomicity
///
/// [`Storage::apply`] must execute the whole operation as one atomic unit
/// for its key: two concurrent `apply` calls on the same key must behave as
/// if they ran one after the other, even when the callers live in different
/// processes. Operations on different keys are unordered.
///
/// # Example
///
/// ```ignore
/// use admitgate::storage::{AtomicOp, Storage};
///
/// async fn example<S: Storage>(storage: &S) -> admitgate::Result<()> {
///     let op = AtomicOp::Increment { window_start: 60_000, limit: 100, hits: 1 };
///     let outcome = storage.apply("user:1", op, Duration::from_secs(60)).await?;
///     println!("allowed: {}", outcome.allowed);
///     Ok(())
/// }
/// ```
pub trait Storage: Send + Sync + 'static {
    /// Get an entry by key.
    ///
    /// Returns `None` if the key doesn't exist or has expired.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<StorageEntry>>> + Send;

    /// Set an entry with a TTL.
    ///
    /// The entry will be automatically removed after the TTL expires.
    fn set(
        &self,
        key: &str,
        entry: StorageEntry,
        ttl: Duration,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Delete an entry.
    ///
    /// Returns success even if the key didn't exist.
    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// Atomically run `op` against the entry for `key` and store the result
    /// with the given TTL.
    fn apply(
        &self,
        key: &str,
        op: AtomicOp,
        ttl: Duration,
    ) -> impl Future<Output = Result<OpOutcome>> + Send;
}

impl<S: Storage + ?Sized> Storage for std::sync::Arc<S> {
    async fn get(&self, key: &str) -> Result<Option<StorageEntry>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, entry: StorageEntry, ttl: Duration) -> Result<()> {
        (**self).set(key, entry, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key).await
    }

    async fn apply(&self, key: &str, op: AtomicOp, ttl: Duration) -> Result<OpOutcome> {
        (**self).apply(key, op, ttl).await
    }
}

impl<S: Storage + ?Sized> Storage for Box<S> {
    async fn get(&self, key: &str) -> Result<Option<StorageEntry>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, entry: StorageEntry, ttl: Duration) -> Result<()> {
        (**self).set(key, entry, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key).await
    }

    async fn apply(&self, key: &str, op: AtomicOp, ttl: Duration) -> Result<OpOutcome> {
        (**self).apply(key, op, ttl).await
    }
}

/// Get the current timestamp in milliseconds since Unix epoch.
///
/// A clock before the epoch reads as 0.
pub fn current_timestamp_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
