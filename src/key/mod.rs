//! Key extraction for rate limiting.
//!
//! A key names the caller a quota belongs to: all requests that extract the
//! same key share one counter per route. The gateway appends the route to
//! the extracted key, so one extractor can serve every route.
//!
//! # Example
//!
//! ```ignore
//! use admitgate::key::{CompositeKey, FallbackKey, HeaderKey, IpKey, MethodKey};
//!
//! // One quota per client address
//! let by_ip = IpKey::with_forwarded_for();
//!
//! // API key when present, otherwise the client address
//! let by_caller = FallbackKey::new(HeaderKey::api_key(), IpKey::new());
//!
//! // Separate quotas per method for the same caller
//! let by_method = CompositeKey::new(IpKey::new(), MethodKey::new());
//! ```

mod composite;
mod extractors;
mod request;

pub use composite::{CompositeKey, FallbackKey};
pub use extractors::{HasHeaders, HasIpAddr, HasMethod, HasPath, HeaderKey, IpKey, MethodKey};
pub use request::RequestParts;

/// Trait for extracting rate limiting keys from requests.
///
/// # Type Parameters
///
/// - `R`: The request type (e.g., [`RequestParts`] or a framework request)
pub trait Key<R>: Send + Sync + 'static {
    /// Extract a rate limiting key from the request.
    ///
    /// Returns `None` if the request carries nothing to key on. The gateway
    /// denies such requests rather than letting them share an anonymous
    /// quota.
    fn extract(&self, request: &R) -> Option<String>;

    /// Get the key name for logging.
    fn name(&self) -> &'static str;
}

/// A constant key that applies the same limit to all requests.
#[derive(Debug, Clone, Default)]
pub struct GlobalKey;

impl GlobalKey {
    /// Create a new global key.
    pub fn new() -> Self {
        Self
    }
}

impl<R> Key<R> for GlobalKey {
    fn extract(&self, _request: &R) -> Option<String> {
        Some("global".to_string())
    }

    fn name(&self) -> &'static str {
        "global"
    }
}

/// A key computed by a closure.
#[derive(Clone)]
pub struct FnKey<F> {
    extractor: F,
    name: &'static str,
}

impl<F> std::fmt::Debug for FnKey<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnKey").field("name", &self.name).finish()
    }
}

impl<F> FnKey<F> {
    /// Create a new function-based key extractor.
    pub fn new(name: &'static str, extractor: F) -> Self {
        Self { extractor, name }
    }
}

impl<R, F> Key<R> for FnKey<F>
where
    F: Fn(&R) -> Option<String> + Send + Sync + 'static,
{
    fn extract(&self, request: &R) -> Option<String> {
        (self.extractor)(request)
    }

    fn name(&self) -> &'static str {
        self.name
    }
}
