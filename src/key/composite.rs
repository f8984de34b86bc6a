//! Combinators over key extractors.

use crate::key::Key;

/// Combine two key extractors into a composite key.
///
/// The resulting key is formatted as `"{key1}:{key2}"`; it is missing if
/// either part is.
///
/// # Example
///
/// ```ignore
/// use admitgate::key::{CompositeKey, IpKey, MethodKey};
///
/// // Results in keys like "ip:192.168.1.1:method:POST"
/// let key = CompositeKey::new(IpKey::new(), MethodKey::new());
/// ```
#[derive(Debug, Clone)]
pub struct CompositeKey<K1, K2> {
    first: K1,
    second: K2,
}

impl<K1, K2> CompositeKey<K1, K2> {
    /// Create a new composite key.
    pub fn new(first: K1, second: K2) -> Self {
        Self { first, second }
    }
}

impl<R, K1, K2> Key<R> for CompositeKey<K1, K2>
where
    K1: Key<R>,
    K2: Key<R>,
{
    fn extract(&self, request: &R) -> Option<String> {
        let first = self.first.extract(request)?;
        let second = self.second.extract(request)?;
        Some(format!("{}:{}", first, second))
    }

    fn name(&self) -> &'static str {
        "composite"
    }
}

/// Use the primary key if it extracts, otherwise the fallback.
#[derive(Debug, Clone)]
pub struct FallbackKey<K1, K2> {
    primary: K1,
    fallback: K2,
}

impl<K1, K2> FallbackKey<K1, K2> {
    /// Create a new fallback key.
    pub fn new(primary: K1, fallback: K2) -> Self {
        Self { primary, fallback }
    }
}

impl<R, K1, K2> Key<R> for FallbackKey<K1, K2>
where
    K1: Key<R>,
    K2: Key<R>,
{
    fn extract(&self, request: &R) -> Option<String> {
        self.primary
            .extract(request)
            .or_else(|| self.fallback.extract(request))
    }

    fn name(&self) -> &'static str {
        self.primary.name()
    }
}
