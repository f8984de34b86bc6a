//! Admission gateway.
//!
//! The gateway is the entry point for request admission. It resolves the
//! route, extracts the caller's key, runs the route's algorithm against the
//! counter store and turns every outcome, including store failures, into an
//! [`AdmitResult`].
//!
//! Two failure paths are distinct:
//!
//! - A route with no configuration is always denied with
//!   [`DenyReason::NotConfigured`].
//! - A store error or timeout is answered with the configured
//!   [`FailureMode`]. Any other error is denied.
//!
//! # Example
//!
//! ```ignore
//! use admitgate::{AdmissionGateway, FailureMode, GatewaySettings, IpKey, MemoryStorage};
//!
//! let gateway = AdmissionGateway::new(
//!     MemoryStorage::new(),
//!     resolver,
//!     IpKey::new(),
//!     GatewaySettings::new(FailureMode::FailClosed),
//! );
//!
//! let result = gateway.admit("/api/search", &request, now).await;
//! if !result.allowed {
//!     // 429 with Retry-After: result.retry_after_ms
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::algorithm::{Algorithm, AlgorithmConfig, BatchedAdmission};
use crate::decision::{Decision, DenyReason, RateLimitInfo};
use crate::error::{ConnectionError, RateLimitError, Result};
use crate::headers::RateLimitHeaders;
use crate::key::Key;
use crate::resolver::{RouteConfig, RouteResolver};
use crate::storage::Storage;

/// Default bound on one store round-trip.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(100);

/// What to do when the counter store fails or times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Admit the request.
    FailOpen,
    /// Deny the request with [`DenyReason::StoreUnavailable`].
    FailClosed,
}

/// Gateway settings.
///
/// The failure mode has no default; it must be chosen explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewaySettings {
    /// Policy for store failures.
    pub failure_mode: FailureMode,
    /// Bound on each store round-trip.
    pub store_timeout: Duration,
}

impl GatewaySettings {
    /// Create settings with the default store timeout.
    pub fn new(failure_mode: FailureMode) -> Self {
        Self {
            failure_mode,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Set the store round-trip timeout.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }
}

/// Result of admitting one request.
///
/// Serializes as `{"allowed": .., "retry_after_ms": .., "reason": ..}`.
#[derive(Debug, Clone, Serialize)]
pub struct AdmitResult {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Milliseconds the caller should wait before retrying (0 if allowed).
    pub retry_after_ms: u64,
    /// Why the request was denied.
    pub reason: Option<DenyReason>,
    #[serde(skip)]
    decision: Decision,
}

impl AdmitResult {
    /// Build a result from an algorithm decision.
    pub fn from_decision(decision: Decision) -> Self {
        Self {
            allowed: decision.is_allowed(),
            retry_after_ms: if decision.is_allowed() {
                0
            } else {
                decision.retry_after_ms()
            },
            reason: decision.reason(),
            decision,
        }
    }

    /// An allowed result that no algorithm metered (failing open).
    pub fn unmetered() -> Self {
        Self::from_decision(Decision::allowed(RateLimitInfo::unmetered()))
    }

    /// A denial that no algorithm produced.
    pub fn rejected(reason: DenyReason) -> Self {
        Self::from_decision(Decision::rejected(reason, RateLimitInfo::unmetered()))
    }

    /// The underlying decision.
    pub fn decision(&self) -> &Decision {
        &self.decision
    }

    /// Whether an algorithm produced this result.
    pub fn is_metered(&self) -> bool {
        self.decision.info().algorithm.is_some()
    }

    /// Rate limit headers for the response.
    pub fn to_headers(&self) -> Vec<(&'static str, String)> {
        if self.is_metered() {
            return RateLimitHeaders::from(&self.decision).to_vec();
        }
        let mut headers = RateLimitHeaders::new();
        if let Some(reason) = self.reason {
            headers = headers.reason(reason);
        }
        headers.to_vec()
    }
}

/// Admission gateway.
///
/// Holds the store, the route table and the key extractor; has no other
/// shared state than the local batch buffers of batched routes.
pub struct AdmissionGateway<S, K> {
    storage: Arc<S>,
    resolver: Arc<RouteResolver>,
    key_extractor: K,
    settings: GatewaySettings,
    batches: BatchedAdmission<AlgorithmConfig>,
}

impl<S, K> std::fmt::Debug for AdmissionGateway<S, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionGateway")
            .field("routes", &self.resolver.len())
            .field("settings", &self.settings)
            .finish()
    }
}

impl<S: Storage, K> AdmissionGateway<S, K> {
    /// Create a gateway.
    pub fn new(storage: S, resolver: RouteResolver, key_extractor: K, settings: GatewaySettings) -> Self {
        Self::with_shared_storage(Arc::new(storage), resolver, key_extractor, settings)
    }

    /// Create a gateway over a store shared with other components.
    pub fn with_shared_storage(
        storage: Arc<S>,
        resolver: RouteResolver,
        key_extractor: K,
        settings: GatewaySettings,
    ) -> Self {
        Self {
            storage,
            resolver: Arc::new(resolver),
            key_extractor,
            settings,
            batches: BatchedAdmission::new(),
        }
    }

    /// The gateway settings.
    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    /// The route table.
    pub fn resolver(&self) -> &RouteResolver {
        &self.resolver
    }

    /// The counter store.
    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// Admit a request for `path`.
    ///
    /// The store key is `{extracted_key}:{route}` where the route part is
    /// the route's key suffix or, failing that, the matched route pattern.
    pub async fn admit<R>(&self, path: &str, request: &R, now: u64) -> AdmitResult
    where
        K: Key<R>,
    {
        let route = match self.resolver.resolve(path) {
            Ok(route) => route,
            Err(e) => {
                tracing::debug!(path, error = %e, "route not configured");
                return AdmitResult::rejected(DenyReason::NotConfigured);
            }
        };

        let Some(base_key) = self.key_extractor.extract(request) else {
            tracing::debug!(
                path,
                extractor = self.key_extractor.name(),
                "no rate limit key in request"
            );
            return AdmitResult::rejected(DenyReason::KeyUnavailable);
        };

        let suffix = route.config.key_suffix.as_deref().unwrap_or(route.pattern);
        let key = format!("{}:{}", base_key, suffix);

        self.admit_key(&key, route.config, now).await
    }

    /// Admit one request for a fully composed key under `route`.
    pub async fn admit_key(&self, key: &str, route: &RouteConfig, now: u64) -> AdmitResult {
        let algorithm = &route.algorithm;

        let outcome = self
            .with_timeout(async {
                match route.batch_percent {
                    Some(percent) => {
                        self.batches
                            .admit(&*self.storage, key, algorithm, percent, now)
                            .await
                    }
                    None => algorithm.check_and_record(&*self.storage, key, now).await,
                }
            })
            .await;

        match outcome {
            Ok(decision) => {
                tracing::debug!(
                    key,
                    algorithm = algorithm.name(),
                    allowed = decision.is_allowed(),
                    remaining = decision.info().remaining,
                    retry_after_ms = decision.retry_after_ms(),
                    "admission decision"
                );
                AdmitResult::from_decision(decision)
            }
            Err(e) => self.on_store_error(key, algorithm.name(), e),
        }
    }

    /// Peek at the decision a request for `key` would get, without
    /// recording it.
    pub async fn peek_key(&self, key: &str, route: &RouteConfig, now: u64) -> AdmitResult {
        let algorithm = &route.algorithm;
        match self
            .with_timeout(algorithm.check(&*self.storage, key, now))
            .await
        {
            Ok(decision) => AdmitResult::from_decision(decision),
            Err(e) => self.on_store_error(key, algorithm.name(), e),
        }
    }

    /// Clear the state of `key` under `route`, in the store and locally.
    pub async fn reset(&self, key: &str, route: &RouteConfig) -> Result<()> {
        self.batches.forget(key);
        self.with_timeout(route.algorithm.reset(&*self.storage, key))
            .await
    }

    /// Reconcile every locally batched request with the store.
    pub async fn flush(&self, now: u64) -> Result<usize> {
        let reconciled = self.batches.flush(&*self.storage, now).await?;
        if reconciled > 0 {
            tracing::debug!(reconciled, "flushed batched admissions");
        }
        Ok(reconciled)
    }

    async fn with_timeout<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        let timeout = self.settings.store_timeout;
        tokio::time::timeout(timeout, fut)
            .await
            .unwrap_or_else(|_| Err(ConnectionError::Timeout(timeout).into()))
    }

    fn on_store_error(&self, key: &str, algorithm: &'static str, error: RateLimitError) -> AdmitResult {
        if !error.is_store_unavailable() {
            tracing::error!(key, algorithm, error = %error, "admission failed, denying");
            return AdmitResult::rejected(DenyReason::StoreUnavailable);
        }
        match self.settings.failure_mode {
            FailureMode::FailOpen => {
                tracing::warn!(key, algorithm, error = %error, "counter store unavailable, failing open");
                AdmitResult::unmetered()
            }
            FailureMode::FailClosed => {
                tracing::warn!(key, algorithm, error = %error, "counter store unavailable, failing closed");
                AdmitResult::rejected(DenyReason::StoreUnavailable)
            }
        }
    }
}
