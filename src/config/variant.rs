//! Variant names.
//!
//! A variant name describes an algorithm and its parameters in one string,
//! the way benchmark runs and deployments label them:
//!
//! ```text
//! sliding_window_counter/redis_script_rate_limit_100_window_size_60_sub_window_count_5
//! token_bucket/redis_async_bucket_capacity_5_refill_rate_1.67_batch_percent_0.5
//! base/base
//! ```
//!
//! The part before the slash names the algorithm family. The part after it
//! is `{backend}_{mode}` followed by `name_value` pairs. `base/base` is the
//! unthrottled baseline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::algorithm::AlgorithmKind;
use crate::config::params::AlgorithmParams;
use crate::error::ConfigError;

const BASE: &str = "base";

/// Counter store a variant was labelled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Redis.
    Redis,
    /// MySQL.
    Mysql,
}

/// How a variant talks to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// One atomic round-trip per request.
    Script,
    /// Batched local admission, reconciled every `batch_percent × limit`
    /// requests.
    Async,
}

/// A parsed variant name.
#[derive(Debug, Clone, PartialEq)]
pub enum Variant {
    /// No throttling.
    Base,
    /// A rate limited variant.
    Limited {
        /// Algorithm family.
        algorithm: AlgorithmKind,
        /// Store backend.
        backend: Backend,
        /// Store access mode.
        mode: Mode,
        /// Parameters carried in the name.
        params: AlgorithmParams,
    },
}

impl Variant {
    /// Whether this is the unthrottled baseline.
    pub fn is_base(&self) -> bool {
        matches!(self, Self::Base)
    }
}

impl FromStr for Variant {
    type Err = ConfigError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let trimmed = name.trim().trim_start_matches('/');
        let unknown = |why: &str| ConfigError::UnknownVariant(format!("'{}': {}", name, why));

        let (family, rest) = trimmed
            .split_once('/')
            .ok_or_else(|| unknown("expected 'family/name'"))?;

        if family == BASE {
            return if rest == BASE {
                Ok(Self::Base)
            } else {
                Err(unknown("the base family only has the 'base' variant"))
            };
        }

        let algorithm: AlgorithmKind = family.parse()?;

        let mut tokens = rest.split('_');
        let backend = match tokens.next() {
            Some("redis") => Backend::Redis,
            Some("mysql") => Backend::Mysql,
            _ => return Err(unknown("expected a 'redis' or 'mysql' backend")),
        };
        let mode = match tokens.next() {
            Some("script") => Mode::Script,
            Some("async") => Mode::Async,
            _ => return Err(unknown("expected a 'script' or 'async' mode")),
        };

        let mut params = AlgorithmParams::default();
        let mut words: Vec<&str> = Vec::new();
        for token in tokens {
            if token.parse::<f64>().is_err() {
                words.push(token);
                continue;
            }
            if words.is_empty() {
                return Err(unknown(&format!("value '{}' has no parameter name", token)));
            }
            set_param(&mut params, &words.join("_"), token).map_err(|why| unknown(&why))?;
            words.clear();
        }
        if !words.is_empty() {
            return Err(unknown(&format!("parameter '{}' has no value", words.join("_"))));
        }

        match (mode, params.batch_percent) {
            (Mode::Async, None) => return Err(unknown("async variants need a batch_percent")),
            (Mode::Script, Some(_)) => return Err(unknown("script variants take no batch_percent")),
            _ => {}
        }

        Ok(Self::Limited {
            algorithm,
            backend,
            mode,
            params,
        })
    }
}

fn set_param(params: &mut AlgorithmParams, name: &str, value: &str) -> Result<(), String> {
    fn parse<T: FromStr>(name: &str, value: &str) -> Result<T, String> {
        value
            .parse()
            .map_err(|_| format!("invalid value '{}' for '{}'", value, name))
    }

    match name {
        "rate_limit" | "rate" => params.rate = Some(parse(name, value)?),
        "window_size" => params.window_size = Some(parse(name, value)?),
        "period" => params.period = Some(parse(name, value)?),
        "burst" => params.burst = Some(parse(name, value)?),
        "sub_window_count" => params.sub_window_count = Some(parse(name, value)?),
        "bucket_capacity" | "capacity" => params.capacity = Some(parse(name, value)?),
        "refill_rate" => params.refill_rate = Some(parse(name, value)?),
        "batch_percent" => params.batch_percent = Some(parse(name, value)?),
        other => return Err(format!("unknown parameter '{}'", other)),
    }
    Ok(())
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Redis => "redis",
            Self::Mysql => "mysql",
        })
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Script => "script",
            Self::Async => "async",
        })
    }
}
