//! Algorithm parameters as they appear in configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::algorithm::{
    AlgorithmConfig, AlgorithmKind, FixedWindow, SlidingWindowCounter, SlidingWindowLog,
    TokenBucket, GCRA,
};
use crate::error::{ConfigError, Result};
use crate::quota::Quota;

/// Raw algorithm parameters.
///
/// Every field is optional here; [`AlgorithmParams::build`] checks that
/// the ones the algorithm needs are present and valid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmParams {
    /// Requests per window or period.
    #[serde(default, alias = "rate_limit", skip_serializing_if = "Option::is_none")]
    pub rate: Option<u64>,
    /// Window length in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_size: Option<f64>,
    /// GCRA period in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<f64>,
    /// GCRA burst tolerance in requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burst: Option<u64>,
    /// Sliding window counter sub-windows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_window_count: Option<u32>,
    /// Token bucket capacity.
    #[serde(default, alias = "bucket_capacity", skip_serializing_if = "Option::is_none")]
    pub capacity: Option<f64>,
    /// Token bucket refill rate in tokens per second.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refill_rate: Option<f64>,
    /// Local batch size as a fraction of the limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_percent: Option<f64>,
}

impl AlgorithmParams {
    /// Fill every unset field from `other`.
    pub fn or(self, other: AlgorithmParams) -> Self {
        Self {
            rate: self.rate.or(other.rate),
            window_size: self.window_size.or(other.window_size),
            period: self.period.or(other.period),
            burst: self.burst.or(other.burst),
            sub_window_count: self.sub_window_count.or(other.sub_window_count),
            capacity: self.capacity.or(other.capacity),
            refill_rate: self.refill_rate.or(other.refill_rate),
            batch_percent: self.batch_percent.or(other.batch_percent),
        }
    }

    /// Build a validated algorithm of the given kind.
    pub fn build(&self, kind: AlgorithmKind) -> Result<AlgorithmConfig> {
        let algorithm = match kind {
            AlgorithmKind::FixedWindow => FixedWindow::new(self.window_quota(kind)?).into(),
            AlgorithmKind::SlidingWindowCounter => SlidingWindowCounter::try_new(
                self.window_quota(kind)?,
                self.sub_window_count.unwrap_or(1),
            )?
            .into(),
            AlgorithmKind::SlidingWindowLog => SlidingWindowLog::new(self.window_quota(kind)?).into(),
            AlgorithmKind::Gcra => {
                let rate = required(self.rate, kind, "rate")?;
                let period = required(self.period.or(self.window_size), kind, "period")?;
                let quota = Quota::try_new(rate, seconds(period, "period")?)?;
                GCRA::new(quota, self.burst.unwrap_or(0)).into()
            }
            AlgorithmKind::TokenBucket => TokenBucket::try_new(
                required(self.capacity, kind, "capacity")?,
                required(self.refill_rate, kind, "refill_rate")?,
            )?
            .into(),
        };
        Ok(algorithm)
    }

    fn window_quota(&self, kind: AlgorithmKind) -> Result<Quota> {
        let rate = required(self.rate, kind, "rate")?;
        let window = required(self.window_size, kind, "window_size")?;
        Quota::try_new(rate, seconds(window, "window_size")?)
    }
}

fn required<T>(value: Option<T>, kind: AlgorithmKind, name: &str) -> Result<T> {
    value.ok_or_else(|| ConfigError::MissingRequired(format!("{} requires '{}'", kind, name)).into())
}

fn seconds(value: f64, name: &str) -> Result<Duration> {
    if !(value.is_finite() && value > 0.0) {
        return Err(ConfigError::InvalidParameters(format!(
            "{} must be a positive number of seconds, got {}",
            name, value
        ))
        .into());
    }
    Ok(Duration::from_secs_f64(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::Algorithm;
    use crate::error::RateLimitError;

    #[test]
    fn test_build_fixed_window() {
        let params = AlgorithmParams {
            rate: Some(100),
            window_size: Some(60.0),
            ..Default::default()
        };
        let algorithm = params.build(AlgorithmKind::FixedWindow).unwrap();
        assert_eq!(algorithm.kind(), AlgorithmKind::FixedWindow);
        assert_eq!(algorithm.limit(), 100);
    }

    #[test]
    fn test_gcra_period_falls_back_to_window() {
        let params = AlgorithmParams {
            rate: Some(10),
            window_size: Some(1.0),
            burst: Some(4),
            ..Default::default()
        };
        let algorithm = params.build(AlgorithmKind::Gcra).unwrap();
        assert_eq!(algorithm.limit(), 5);
    }

    #[test]
    fn test_missing_and_invalid_parameters() {
        let err = AlgorithmParams::default()
            .build(AlgorithmKind::TokenBucket)
            .unwrap_err();
        assert!(matches!(err, RateLimitError::Config(ConfigError::MissingRequired(_))));

        let params = AlgorithmParams {
            rate: Some(10),
            window_size: Some(-1.0),
            ..Default::default()
        };
        let err = params.build(AlgorithmKind::SlidingWindowLog).unwrap_err();
        assert!(matches!(err, RateLimitError::Config(ConfigError::InvalidParameters(_))));

        let params = AlgorithmParams {
            rate: Some(0),
            window_size: Some(60.0),
            ..Default::default()
        };
        assert!(params.build(AlgorithmKind::FixedWindow).is_err());
    }

    #[test]
    fn test_or_prefers_self() {
        let explicit = AlgorithmParams {
            rate: Some(5),
            ..Default::default()
        };
        let fallback = AlgorithmParams {
            rate: Some(100),
            window_size: Some(60.0),
            ..Default::default()
        };
        let merged = explicit.or(fallback);
        assert_eq!(merged.rate, Some(5));
        assert_eq!(merged.window_size, Some(60.0));
    }
}
