//! Gateway configuration files.
//!
//! A configuration document chooses the failure mode and lists the routes
//! with their algorithms. Both YAML and JSON are accepted:
//!
//! ```yaml
//! failure_mode: fail_closed
//! store_timeout_ms: 50
//! routes:
//!   - pattern: /gcra/**
//!     algorithm: gcra
//!     rate: 100
//!     period: 60
//!     burst: 5
//!   - pattern: /token_bucket/**
//!     variant: token_bucket/redis_async_bucket_capacity_5_refill_rate_1.67_batch_percent_0.5
//! ```
//!
//! Everything is validated when the document is loaded; a loaded
//! configuration always builds.

mod params;
mod variant;

pub use params::AlgorithmParams;
pub use variant::{Backend, Mode, Variant};

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::algorithm::AlgorithmKind;
use crate::error::{ConfigError, Result};
use crate::gateway::{AdmissionGateway, FailureMode, GatewaySettings, DEFAULT_STORE_TIMEOUT};
use crate::resolver::{RouteConfig, RouteResolver};
use crate::storage::Storage;

fn default_store_timeout_ms() -> u64 {
    DEFAULT_STORE_TIMEOUT.as_millis() as u64
}

/// A gateway configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Policy for store failures. Required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_mode: Option<FailureMode>,
    /// Bound on each store round-trip, in milliseconds.
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    /// Routes, in resolution order for patterns.
    #[serde(default)]
    pub routes: Vec<RouteEntry>,
}

/// One route of a configuration document.
///
/// The algorithm comes from `algorithm` plus explicit parameters, from a
/// `variant` name, or from both; explicit parameters override the ones in
/// the variant name. Parameters sit next to the other route keys, and a
/// key that is neither is rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RouteEntryDef")]
pub struct RouteEntry {
    /// Exact path or glob pattern.
    pub pattern: String,
    /// Variant name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    /// Algorithm family.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<AlgorithmKind>,
    /// Algorithm parameters.
    #[serde(flatten)]
    pub params: AlgorithmParams,
    /// Key suffix used instead of the pattern.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_suffix: Option<String>,
}

/// Wire form of [`RouteEntry`].
///
/// `deny_unknown_fields` does not combine with `flatten`, so the
/// parameters are spelled out here.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RouteEntryDef {
    pattern: String,
    #[serde(default)]
    variant: Option<String>,
    #[serde(default)]
    algorithm: Option<AlgorithmKind>,
    #[serde(default)]
    key_suffix: Option<String>,
    #[serde(default, alias = "rate_limit")]
    rate: Option<u64>,
    #[serde(default)]
    window_size: Option<f64>,
    #[serde(default)]
    period: Option<f64>,
    #[serde(default)]
    burst: Option<u64>,
    #[serde(default)]
    sub_window_count: Option<u32>,
    #[serde(default, alias = "bucket_capacity")]
    capacity: Option<f64>,
    #[serde(default)]
    refill_rate: Option<f64>,
    #[serde(default)]
    batch_percent: Option<f64>,
}

impl From<RouteEntryDef> for RouteEntry {
    fn from(def: RouteEntryDef) -> Self {
        Self {
            pattern: def.pattern,
            variant: def.variant,
            algorithm: def.algorithm,
            params: AlgorithmParams {
                rate: def.rate,
                window_size: def.window_size,
                period: def.period,
                burst: def.burst,
                sub_window_count: def.sub_window_count,
                capacity: def.capacity,
                refill_rate: def.refill_rate,
                batch_percent: def.batch_percent,
            },
            key_suffix: def.key_suffix,
        }
    }
}

impl RouteEntry {
    /// Build the route configuration.
    pub fn route_config(&self) -> Result<RouteConfig> {
        let (kind, params) = match &self.variant {
            Some(name) => match name.parse::<Variant>()? {
                Variant::Base => {
                    return Err(ConfigError::InvalidRoute(format!(
                        "route '{}': the base variant does not throttle",
                        self.pattern
                    ))
                    .into());
                }
                Variant::Limited {
                    algorithm,
                    backend,
                    mode,
                    params,
                } => {
                    if let Some(explicit) = self.algorithm.filter(|kind| *kind != algorithm) {
                        return Err(ConfigError::InvalidRoute(format!(
                            "route '{}': algorithm {} conflicts with variant {}",
                            self.pattern, explicit, name
                        ))
                        .into());
                    }
                    tracing::debug!(
                        pattern = %self.pattern,
                        variant = %name,
                        %backend,
                        %mode,
                        "route uses variant"
                    );
                    (algorithm, self.params.clone().or(params))
                }
            },
            None => {
                let kind = self.algorithm.ok_or_else(|| {
                    ConfigError::MissingRequired(format!(
                        "route '{}' needs an algorithm or a variant",
                        self.pattern
                    ))
                })?;
                (kind, self.params.clone())
            }
        };

        let mut config = RouteConfig::new(params.build(kind)?);
        config.batch_percent = params.batch_percent;
        config.key_suffix = self.key_suffix.clone();
        Ok(config)
    }
}

impl GatewayConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.loaded("yaml")
    }

    /// Parse and validate a JSON document.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.loaded("json")
    }

    /// Read a configuration file. `.json` files are parsed as JSON,
    /// everything else as YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Parse(format!("{}: {}", path.display(), e)))?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json(&text),
            _ => Self::from_yaml(&text),
        }
    }

    fn loaded(self, format: &'static str) -> Result<Self> {
        self.validate()?;
        tracing::info!(
            format,
            routes = self.routes.len(),
            failure_mode = ?self.failure_mode,
            store_timeout_ms = self.store_timeout_ms,
            "loaded gateway configuration"
        );
        Ok(self)
    }

    /// Check that the configuration builds.
    pub fn validate(&self) -> Result<()> {
        self.settings()?;
        self.resolver()?;
        Ok(())
    }

    /// Gateway settings.
    pub fn settings(&self) -> Result<GatewaySettings> {
        let failure_mode = self
            .failure_mode
            .ok_or_else(|| ConfigError::MissingRequired("failure_mode".into()))?;
        if self.store_timeout_ms == 0 {
            return Err(
                ConfigError::InvalidParameters("store_timeout_ms must be positive".into()).into(),
            );
        }
        Ok(GatewaySettings::new(failure_mode)
            .with_store_timeout(Duration::from_millis(self.store_timeout_ms)))
    }

    /// Route table.
    pub fn resolver(&self) -> Result<RouteResolver> {
        let mut builder = RouteResolver::builder();
        for entry in &self.routes {
            builder = builder.add(entry.pattern.clone(), entry.route_config()?);
        }
        builder.build()
    }

    /// Build a gateway over `storage`.
    pub fn gateway<S: Storage, K>(&self, storage: S, key_extractor: K) -> Result<AdmissionGateway<S, K>> {
        Ok(AdmissionGateway::new(
            storage,
            self.resolver()?,
            key_extractor,
            self.settings()?,
        ))
    }
}
