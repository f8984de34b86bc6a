//! Batched admission with local buffering.
//!
//! Relaxes consistency in exchange for fewer store round-trips. Each
//! process admits requests for a key locally until `batch` of them are
//! pending, then reconciles them with the store in one atomic charge
//! (`hits = pending`, [`ChargeMode::Charge`]). If the store reports the
//! quota exceeded, the key is blocked locally until the store's
//! retry-after.
//!
//! Over-admission per process is bounded by the batch size:
//! `batch = max(1, floor(batch_percent × limit))`.

use std::time::Duration;

use dashmap::DashMap;

use crate::algorithm::Algorithm;
use crate::decision::{Decision, RateLimitInfo};
use crate::error::Result;
use crate::storage::{ChargeMode, Storage};

/// Number of requests admitted locally between reconciliations.
pub fn batch_size(batch_percent: f64, limit: u64) -> u64 {
    let batch = (batch_percent * limit as f64).floor();
    if batch.is_finite() && batch >= 1.0 {
        batch as u64
    } else {
        1
    }
}

/// Local view of one key.
#[derive(Debug, Clone)]
struct LocalQuota<A> {
    algorithm: A,
    batch: u64,
    pending: u64,
    blocked_until: u64,
    last_seen: u64,
}

enum Step {
    Blocked(u64),
    Optimistic { remaining: u64 },
    Reconcile(u64),
}

/// Per-process buffer of locally admitted requests.
///
/// Keys are independent; the buffer never holds a lock across a store
/// round-trip.
///
/// # Example
///
/// ```ignore
/// use admitgate::{BatchedAdmission, FixedWindow, AlgorithmConfig, Quota, MemoryStorage};
///
/// let batched = BatchedAdmission::new();
/// let algorithm: AlgorithmConfig = FixedWindow::new(Quota::per_minute(100)).into();
///
/// // Reconciles with the store every 10 requests.
/// let decision = batched.admit(&storage, "user:1", &algorithm, 0.1, now).await?;
///
/// // Push out whatever is still pending.
/// batched.flush(&storage, now).await?;
/// ```
pub struct BatchedAdmission<A> {
    local: DashMap<String, LocalQuota<A>>,
}

impl<A> std::fmt::Debug for BatchedAdmission<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchedAdmission")
            .field("keys", &self.local.len())
            .finish()
    }
}

impl<A> Default for BatchedAdmission<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> BatchedAdmission<A> {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self {
            local: DashMap::new(),
        }
    }

    /// Requests admitted locally and not yet charged to the store.
    pub fn pending(&self, key: &str) -> u64 {
        self.local.get(key).map(|q| q.pending).unwrap_or(0)
    }

    /// Number of keys tracked locally.
    pub fn len(&self) -> usize {
        self.local.len()
    }

    /// Whether no key is tracked locally.
    pub fn is_empty(&self) -> bool {
        self.local.is_empty()
    }

    /// Forget the local state of a key.
    pub fn forget(&self, key: &str) {
        self.local.remove(key);
    }
}

impl<A: Algorithm + Clone> BatchedAdmission<A> {
    /// Admit one request for `key`.
    pub async fn admit<S: Storage>(
        &self,
        storage: &S,
        key: &str,
        algorithm: &A,
        batch_percent: f64,
        now: u64,
    ) -> Result<Decision> {
        let step = {
            let mut quota = self
                .local
                .entry(key.to_string())
                .or_insert_with(|| LocalQuota {
                    algorithm: algorithm.clone(),
                    batch: batch_size(batch_percent, algorithm.limit()),
                    pending: 0,
                    blocked_until: 0,
                    last_seen: now,
                });
            quota.last_seen = quota.last_seen.max(now);

            if quota.blocked_until > now {
                Step::Blocked(quota.blocked_until - now)
            } else {
                quota.pending += 1;
                if quota.pending < quota.batch {
                    Step::Optimistic {
                        remaining: quota.batch - quota.pending,
                    }
                } else {
                    Step::Reconcile(std::mem::take(&mut quota.pending))
                }
            }
        };

        match step {
            Step::Blocked(wait_ms) => {
                let wait = Duration::from_millis(wait_ms);
                let info = RateLimitInfo::new(algorithm.limit(), 0, wait)
                    .with_retry_after(wait)
                    .with_algorithm(algorithm.name());
                Ok(Decision::denied(info))
            }
            Step::Optimistic { remaining } => {
                let info = RateLimitInfo::new(algorithm.limit(), remaining, Duration::ZERO)
                    .with_algorithm(algorithm.name());
                Ok(Decision::allowed(info))
            }
            Step::Reconcile(hits) => self.reconcile(storage, key, algorithm, hits, now).await,
        }
    }

    /// Charge every pending request to the store and drop idle keys.
    ///
    /// Returns the number of keys reconciled. Keys whose charge fails keep
    /// their pending count; the first error is returned after all keys were
    /// attempted.
    pub async fn flush<S: Storage>(&self, storage: &S, now: u64) -> Result<usize> {
        let batches: Vec<(String, A, u64)> = self
            .local
            .iter_mut()
            .filter(|quota| quota.pending > 0)
            .map(|mut quota| {
                let hits = std::mem::take(&mut quota.pending);
                (quota.key().clone(), quota.algorithm.clone(), hits)
            })
            .collect();

        let mut reconciled = 0;
        let mut first_error = None;
        for (key, algorithm, hits) in batches {
            match self.reconcile(storage, &key, &algorithm, hits, now).await {
                Ok(_) => reconciled += 1,
                Err(e) => {
                    tracing::warn!(key = %key, hits, error = %e, "batched flush failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        self.local.retain(|_, quota| {
            let idle_for = Duration::from_millis(now.saturating_sub(quota.last_seen));
            quota.pending > 0
                || quota.blocked_until > now
                || idle_for < quota.algorithm.ttl(now, 1)
        });

        match first_error {
            Some(e) => Err(e),
            None => Ok(reconciled),
        }
    }

    async fn reconcile<S: Storage>(
        &self,
        storage: &S,
        key: &str,
        algorithm: &A,
        hits: u64,
        now: u64,
    ) -> Result<Decision> {
        // Gives the hits back if the charge fails or is cancelled.
        let mut guard = PendingGuard {
            local: &self.local,
            key,
            hits,
        };

        let decision = algorithm
            .acquire(storage, key, now, hits, ChargeMode::Charge)
            .await?;
        guard.hits = 0;
        drop(guard);

        if decision.is_denied() {
            let blocked_until = now + decision.retry_after_ms();
            if let Some(mut quota) = self.local.get_mut(key) {
                quota.blocked_until = quota.blocked_until.max(blocked_until);
            }
            tracing::debug!(key, hits, blocked_until, "batch exceeded quota");
        }
        Ok(decision)
    }
}

struct PendingGuard<'a, A> {
    local: &'a DashMap<String, LocalQuota<A>>,
    key: &'a str,
    hits: u64,
}

impl<A> Drop for PendingGuard<'_, A> {
    fn drop(&mut self) {
        if self.hits > 0 {
            if let Some(mut quota) = self.local.get_mut(self.key) {
                quota.pending += self.hits;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::{AlgorithmConfig, FixedWindow, TokenBucket};
    use crate::error::StorageError;
    use crate::quota::Quota;
    use crate::storage::{AtomicOp, OpOutcome, StorageEntry};
    #[cfg(feature = "memory")]
    use crate::storage::MemoryStorage;

    struct FailingStorage;

    impl Storage for FailingStorage {
        async fn get(&self, _key: &str) -> Result<Option<StorageEntry>> {
            Err(StorageError::operation_failed("down").into())
        }

        async fn set(&self, _key: &str, _entry: StorageEntry, _ttl: Duration) -> Result<()> {
            Err(StorageError::operation_failed("down").into())
        }

        async fn delete(&self, _key: &str) -> Result<()> {
            Err(StorageError::operation_failed("down").into())
        }

        async fn apply(&self, _key: &str, _op: AtomicOp, _ttl: Duration) -> Result<OpOutcome> {
            Err(StorageError::operation_failed("down").into())
        }
    }

    #[test]
    fn test_batch_size() {
        assert_eq!(batch_size(0.1, 100), 10);
        assert_eq!(batch_size(0.25, 10), 2);
        assert_eq!(batch_size(0.01, 10), 1);
        assert_eq!(batch_size(0.0, 10), 1);
        assert_eq!(batch_size(f64::NAN, 10), 1);
    }

    #[cfg(feature = "memory")]
    #[tokio::test]
    async fn test_over_admission_bounded_by_batch() {
        let storage = MemoryStorage::new();
        let batched = BatchedAdmission::new();
        let algorithm: AlgorithmConfig = FixedWindow::new(Quota::per_minute(10)).into();

        let mut admitted = 0;
        for _ in 0..30 {
            let decision = batched
                .admit(&storage, "k", &algorithm, 0.2, 1_000)
                .await
                .unwrap();
            if decision.is_allowed() {
                admitted += 1;
            }
        }

        assert!(admitted >= 10);
        assert!(admitted <= 10 + batch_size(0.2, 10));
        // Blocked until the window ends.
        let decision = batched.admit(&storage, "k", &algorithm, 0.2, 30_000).await.unwrap();
        assert!(decision.is_denied());
        assert_eq!(decision.retry_after_ms(), 30_000);
    }

    #[cfg(feature = "memory")]
    #[tokio::test]
    async fn test_reconciles_every_batch() {
        let storage = MemoryStorage::new();
        let batched = BatchedAdmission::new();
        let algorithm: AlgorithmConfig = FixedWindow::new(Quota::per_minute(100)).into();

        for _ in 0..9 {
            batched.admit(&storage, "k", &algorithm, 0.1, 1_000).await.unwrap();
        }
        assert_eq!(batched.pending("k"), 9);
        assert!(storage.get("k").await.unwrap().is_none());

        batched.admit(&storage, "k", &algorithm, 0.1, 1_000).await.unwrap();
        assert_eq!(batched.pending("k"), 0);
        assert_eq!(storage.get("k").await.unwrap().unwrap().count, 10);
    }

    #[cfg(feature = "memory")]
    #[tokio::test]
    async fn test_flush_charges_pending() {
        let storage = MemoryStorage::new();
        let batched = BatchedAdmission::new();
        let algorithm: AlgorithmConfig = TokenBucket::new(10.0, 1.0).into();

        for _ in 0..3 {
            batched.admit(&storage, "k", &algorithm, 0.5, 0).await.unwrap();
        }
        assert_eq!(batched.flush(&storage, 0).await.unwrap(), 1);
        assert_eq!(batched.pending("k"), 0);

        let tokens = storage.get("k").await.unwrap().unwrap().tokens_or_default();
        assert!((tokens - 7.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_store_error_keeps_pending() {
        let batched = BatchedAdmission::new();
        let algorithm: AlgorithmConfig = FixedWindow::new(Quota::per_minute(4)).into();

        batched.admit(&FailingStorage, "k", &algorithm, 0.5, 0).await.unwrap();
        let result = batched.admit(&FailingStorage, "k", &algorithm, 0.5, 0).await;
        assert!(result.unwrap_err().is_store_unavailable());
        assert_eq!(batched.pending("k"), 2);

        assert!(batched.flush(&FailingStorage, 0).await.is_err());
        assert_eq!(batched.pending("k"), 2);
    }

    #[cfg(feature = "memory")]
    #[tokio::test]
    async fn test_flush_evicts_idle_keys() {
        let storage = MemoryStorage::new();
        let batched = BatchedAdmission::new();
        let algorithm: AlgorithmConfig = FixedWindow::new(Quota::per_second(10)).into();

        batched.admit(&storage, "idle", &algorithm, 0.1, 0).await.unwrap();
        assert_eq!(batched.len(), 1);

        batched.flush(&storage, 60_000).await.unwrap();
        assert!(batched.is_empty());
    }
}
