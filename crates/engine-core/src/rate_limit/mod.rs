//! Pluggable throttling consulted before each read or write batch.

use crate::error::RateLimitError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, sync::Arc};

pub mod token_bucket;

pub use token_bucket::{QpsRateLimiter, TpsRateLimiter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationType {
    Select,
    Insert,
    Update,
    Delete,
}

impl OperationType {
    pub fn is_write(&self) -> bool {
        !matches!(self, OperationType::Select)
    }
}

#[async_trait]
pub trait RateLimitAlgorithm: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Waits until `weight` units of `operation` may proceed. Operations the
    /// algorithm does not govern return immediately.
    async fn apply(&self, operation: OperationType, weight: u64);
}

/// `{"type": "QPS", "props": {"qps": 50}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub props: HashMap<String, u64>,
}

impl RateLimiterConfig {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            props: HashMap::new(),
        }
    }

    pub fn with_prop(mut self, key: impl Into<String>, value: u64) -> Self {
        self.props.insert(key.into(), value);
        self
    }
}

pub const SUPPORTED_ALGORITHMS: &[&str] = &["QPS", "TPS"];

/// Builds the algorithm registered under `config.kind`.
pub fn rate_limiter_for(
    config: &RateLimiterConfig,
) -> Result<Arc<dyn RateLimitAlgorithm>, RateLimitError> {
    let rate = |key: &str, default: u64| -> Result<u64, RateLimitError> {
        match config.props.get(key).copied().unwrap_or(default) {
            0 => Err(RateLimitError::InvalidRate(key.to_string())),
            value => Ok(value),
        }
    };

    match config.kind.trim().to_ascii_uppercase().as_str() {
        "QPS" => Ok(Arc::new(QpsRateLimiter::new(rate(
            "qps",
            QpsRateLimiter::DEFAULT_QPS,
        )?))),
        "TPS" => Ok(Arc::new(TpsRateLimiter::new(rate(
            "tps",
            TpsRateLimiter::DEFAULT_TPS,
        )?))),
        _ => Err(RateLimitError::UnknownAlgorithm(config.kind.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_algorithms_by_name() {
        let qps = rate_limiter_for(&RateLimiterConfig::new("qps")).unwrap();
        assert_eq!(qps.name(), "QPS");

        let tps = rate_limiter_for(&RateLimiterConfig::new("TPS").with_prop("tps", 10)).unwrap();
        assert_eq!(tps.name(), "TPS");
    }

    #[test]
    fn rejects_unknown_or_zero_rate() {
        assert_eq!(
            rate_limiter_for(&RateLimiterConfig::new("LEAKY")).unwrap_err(),
            RateLimitError::UnknownAlgorithm("LEAKY".to_string())
        );
        assert_eq!(
            rate_limiter_for(&RateLimiterConfig::new("QPS").with_prop("qps", 0)).unwrap_err(),
            RateLimitError::InvalidRate("qps".to_string())
        );
    }

    #[test]
    fn parses_config_json() {
        let config: RateLimiterConfig =
            serde_json::from_str(r#"{"type":"TPS","props":{"tps":500}}"#).unwrap();
        assert_eq!(config, RateLimiterConfig::new("TPS").with_prop("tps", 500));
    }
}
