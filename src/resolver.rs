//! Route resolution for per-route configuration.
//!
//! The `RouteResolver` maps a request path to the algorithm and parameters
//! configured for it. Exact routes win over patterns; patterns are tried in
//! declaration order. A path with no match is not configured, which the
//! gateway treats as a denial.
//!
//! # Example
//!
//! ```ignore
//! use admitgate::{RouteResolver, RouteConfig, Quota, GCRA, FixedWindow};
//!
//! let resolver = RouteResolver::builder()
//!     .route("/api/search", RouteConfig::new(FixedWindow::new(Quota::per_minute(30))))
//!     .route_pattern("/api/users/*", RouteConfig::new(GCRA::new(Quota::per_second(20), 5)))
//!     .build()?;
//!
//! let route = resolver.resolve("/api/users/42")?;
//! ```

use std::collections::HashMap;

use crate::algorithm::{Algorithm, AlgorithmConfig};
use crate::error::{ConfigError, RateLimitError, Result};

/// A rate limit configuration for a specific route.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteConfig {
    /// The algorithm and its parameters.
    pub algorithm: AlgorithmConfig,
    /// Fraction of the limit admitted locally between store
    /// reconciliations. `None` means every request goes to the store.
    pub batch_percent: Option<f64>,
    /// Optional custom key suffix.
    pub key_suffix: Option<String>,
}

impl RouteConfig {
    /// Create a new route config with the given algorithm.
    pub fn new(algorithm: impl Into<AlgorithmConfig>) -> Self {
        Self {
            algorithm: algorithm.into(),
            batch_percent: None,
            key_suffix: None,
        }
    }

    /// Admit requests in local batches of `batch_percent × limit` (at
    /// least one request per batch).
    pub fn with_batch_percent(mut self, batch_percent: f64) -> Self {
        self.batch_percent = Some(batch_percent);
        self
    }

    /// Add a custom key suffix.
    pub fn with_key_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.key_suffix = Some(suffix.into());
        self
    }

    fn validate(&self, pattern: &str) -> Result<()> {
        if let Some(percent) = self.batch_percent {
            if !(0.0..=1.0).contains(&percent) {
                return Err(ConfigError::InvalidParameters(format!(
                    "route '{}': batch_percent must be in [0, 1], got {}",
                    pattern, percent
                ))
                .into());
            }
        }
        if self.algorithm.limit() == 0 {
            return Err(ConfigError::InvalidParameters(format!(
                "route '{}': {} admits no requests",
                pattern,
                self.algorithm.name()
            ))
            .into());
        }
        Ok(())
    }
}

impl From<AlgorithmConfig> for RouteConfig {
    fn from(algorithm: AlgorithmConfig) -> Self {
        Self::new(algorithm)
    }
}

/// The configuration a path resolved to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedRoute<'a> {
    /// The route or pattern that matched.
    pub pattern: &'a str,
    /// Its configuration.
    pub config: &'a RouteConfig,
}

/// Maps request paths to route configurations.
///
/// Immutable once built; share it behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct RouteResolver {
    routes: HashMap<String, RouteConfig>,
    patterns: Vec<(String, RouteConfig)>,
}

impl RouteResolver {
    /// Create a new resolver builder.
    pub fn builder() -> RouteResolverBuilder {
        RouteResolverBuilder::new()
    }

    /// Find the configuration for a path.
    ///
    /// Returns [`RateLimitError::NotConfigured`] if no route matches.
    pub fn resolve(&self, path: &str) -> Result<ResolvedRoute<'_>> {
        // Exact match first
        if let Some((pattern, config)) = self.routes.get_key_value(path) {
            return Ok(ResolvedRoute { pattern, config });
        }

        // Pattern matching
        self.patterns
            .iter()
            .find(|(pattern, _)| pattern_matches(pattern, path))
            .map(|(pattern, config)| ResolvedRoute { pattern, config })
            .ok_or_else(|| RateLimitError::NotConfigured(path.to_string()))
    }

    /// Number of configured routes and patterns.
    pub fn len(&self) -> usize {
        self.routes.len() + self.patterns.len()
    }

    /// Whether no route is configured.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Check if a pattern matches a path.
///
/// Simple glob-style matching:
/// - `*` matches any single path segment
/// - `**` matches any number of segments
pub fn pattern_matches(pattern: &str, path: &str) -> bool {
    let pattern_parts: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
    let path_parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let mut pi = 0; // pattern index
    let mut pa = 0; // path index

    while pi < pattern_parts.len() {
        let p = pattern_parts[pi];

        if p == "**" {
            // ** matches rest of path
            return true;
        }
        if pa == path_parts.len() {
            return false;
        }
        if p != "*" && p != path_parts[pa] {
            return false;
        }
        pi += 1;
        pa += 1;
    }

    // Pattern exhausted - check if path is also exhausted
    pa == path_parts.len()
}

/// Whether a route string is a glob pattern rather than an exact path.
pub fn is_pattern(route: &str) -> bool {
    route.split('/').any(|segment| segment == "*" || segment == "**")
}

/// Builder for RouteResolver.
#[derive(Debug, Default)]
pub struct RouteResolverBuilder {
    entries: Vec<(String, RouteConfig, bool)>,
}

impl RouteResolverBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rate limit for a specific route.
    pub fn route(mut self, path: impl Into<String>, config: impl Into<RouteConfig>) -> Self {
        self.entries.push((path.into(), config.into(), false));
        self
    }

    /// Add a rate limit for a route pattern.
    ///
    /// Patterns support `*` for single segment and `**` for multiple segments.
    pub fn route_pattern(
        mut self,
        pattern: impl Into<String>,
        config: impl Into<RouteConfig>,
    ) -> Self {
        self.entries.push((pattern.into(), config.into(), true));
        self
    }

    /// Add a route, treating it as a pattern if it contains `*` or `**`
    /// segments.
    pub fn add(self, route: impl Into<String>, config: impl Into<RouteConfig>) -> Self {
        let route = route.into();
        if is_pattern(&route) {
            self.route_pattern(route, config)
        } else {
            self.route(route, config)
        }
    }

    /// Validate the routes and build the resolver.
    pub fn build(self) -> Result<RouteResolver> {
        let mut resolver = RouteResolver::default();

        for (route, config, pattern) in self.entries {
            if route.trim().is_empty() {
                return Err(ConfigError::InvalidRoute("route pattern is empty".into()).into());
            }
            config.validate(&route)?;

            let duplicate = if pattern {
                resolver.patterns.iter().any(|(p, _)| *p == route)
            } else {
                resolver.routes.contains_key(&route)
            };
            if duplicate {
                return Err(
                    ConfigError::InvalidRoute(format!("route '{}' is declared twice", route)).into(),
                );
            }

            if pattern {
                resolver.patterns.push((route, config));
            } else {
                resolver.routes.insert(route, config);
            }
        }

        Ok(resolver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::{FixedWindow, GCRA};
    use crate::quota::Quota;

    fn fixed(rate: u64) -> RouteConfig {
        RouteConfig::new(FixedWindow::new(Quota::per_minute(rate)))
    }

    #[test]
    fn test_pattern_matches_exact() {
        assert!(pattern_matches("/api/users", "/api/users"));
        assert!(!pattern_matches("/api/users", "/api/posts"));
    }

    #[test]
    fn test_pattern_matches_single_wildcard() {
        assert!(pattern_matches("/api/*/posts", "/api/users/posts"));
        assert!(pattern_matches("/api/*/posts", "/api/admins/posts"));
        assert!(!pattern_matches("/api/*/posts", "/api/users/comments"));
        assert!(!pattern_matches("/api/*", "/api"));
    }

    #[test]
    fn test_pattern_matches_double_wildcard() {
        assert!(pattern_matches("/api/**", "/api/users"));
        assert!(pattern_matches("/api/**", "/api/users/123/posts"));
        assert!(pattern_matches("/api/**", "/api"));
        assert!(!pattern_matches("/api/**", "/v2/api/users"));
    }

    #[test]
    fn test_exact_route_wins_over_pattern() {
        let resolver = RouteResolver::builder()
            .route_pattern("/api/**", fixed(10))
            .route("/api/login", fixed(5))
            .build()
            .unwrap();

        let route = resolver.resolve("/api/login").unwrap();
        assert_eq!(route.pattern, "/api/login");

        let route = resolver.resolve("/api/users/1").unwrap();
        assert_eq!(route.pattern, "/api/**");
    }

    #[test]
    fn test_patterns_in_declaration_order() {
        let resolver = RouteResolver::builder()
            .add("/gcra/*", RouteConfig::new(GCRA::new(Quota::per_second(1), 0)))
            .add("/**", fixed(100))
            .build()
            .unwrap();

        assert_eq!(resolver.resolve("/gcra/a").unwrap().pattern, "/gcra/*");
        assert_eq!(resolver.resolve("/gcra/a/b").unwrap().pattern, "/**");
        assert_eq!(resolver.len(), 2);
    }

    #[test]
    fn test_unmapped_route_is_not_configured() {
        let resolver = RouteResolver::builder().route("/a", fixed(1)).build().unwrap();
        let err = resolver.resolve("/b").unwrap_err();
        assert!(matches!(err, RateLimitError::NotConfigured(ref p) if p == "/b"));
    }

    #[test]
    fn test_build_rejects_bad_routes() {
        assert!(RouteResolver::builder().route("", fixed(1)).build().is_err());
        assert!(RouteResolver::builder()
            .route("/a", fixed(1))
            .route("/a", fixed(2))
            .build()
            .is_err());
        assert!(RouteResolver::builder()
            .route("/a", fixed(1).with_batch_percent(1.5))
            .build()
            .is_err());
    }
}
