//! Named scaling rules registered by operators.

use crate::error::ConfigError;
use engine_core::{rate_limit::RateLimiterConfig, state::job_item::JobItemRepository};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

/// A pluggable algorithm reference: `{"type": "...", "props": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlgorithmConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub props: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingRule {
    pub name: String,
    #[serde(default)]
    pub completion_detector: Option<AlgorithmConfig>,
    #[serde(default)]
    pub data_consistency_checker: Option<AlgorithmConfig>,
    #[serde(default)]
    pub stream_channel: Option<AlgorithmConfig>,
    #[serde(default)]
    pub read: Option<RuleRateLimit>,
    #[serde(default)]
    pub write: Option<RuleRateLimit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleRateLimit {
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub rate_limiter: Option<RateLimiterConfig>,
}

impl ScalingRule {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        if self.name.trim().is_empty() || self.name.contains('/') {
            errors.push(format!("invalid rule name `{}`", self.name));
        }
        if let Some(checker) = &self.data_consistency_checker {
            if let Err(err) = checker.kind.parse::<crate::check::CheckAlgorithm>() {
                errors.push(err.to_string());
            }
        }
        for (side, limit) in [("read", &self.read), ("write", &self.write)] {
            let Some(limit) = limit else { continue };
            if limit.batch_size == Some(0) {
                errors.push(format!("{side}.batch_size must be greater than zero"));
            }
            if let Some(config) = &limit.rate_limiter {
                if let Err(err) = engine_core::rate_limit::rate_limiter_for(config) {
                    errors.push(format!("{side}.rate_limiter: {err}"));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::ValidationFailed(errors))
        }
    }
}

/// `CREATE SCALING RULE`: validates and stores the rule; a taken name is
/// rejected without touching the stored one.
pub async fn create_rule(repo: &JobItemRepository, rule: &ScalingRule) -> Result<(), ConfigError> {
    rule.validate()?;
    if !repo.create_rule(&rule.name, rule).await? {
        return Err(ConfigError::DuplicateRule(rule.name.clone()));
    }
    info!(rule = %rule.name, "Created scaling rule");
    Ok(())
}

pub async fn list_rules(repo: &JobItemRepository) -> Result<Vec<ScalingRule>, ConfigError> {
    let mut rules = Vec::new();
    for name in repo.rule_names().await? {
        if let Some(rule) = repo.load_rule(&name).await? {
            rules.push(rule);
        }
    }
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_core::state::memory::MemoryRepository;
    use std::sync::Arc;

    fn rule(name: &str) -> ScalingRule {
        serde_json::from_str(&format!(
            r#"{{
                "name": "{name}",
                "data_consistency_checker": {{"type": "COUNT"}},
                "write": {{"batch_size": 500, "rate_limiter": {{"type": "TPS", "props": {{"tps": 100}}}}}}
            }}"#
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn duplicate_rule_name_is_rejected() {
        let repo = JobItemRepository::new(Arc::new(MemoryRepository::new()));

        create_rule(&repo, &rule("default")).await.unwrap();
        let err = create_rule(&repo, &rule("default")).await.unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateRule(name) if name == "default"));

        create_rule(&repo, &rule("nightly")).await.unwrap();
        let names: Vec<_> = list_rules(&repo)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["default", "nightly"]);
    }

    #[tokio::test]
    async fn invalid_rule_is_not_stored() {
        let repo = JobItemRepository::new(Arc::new(MemoryRepository::new()));
        let mut bad = rule("bad");
        bad.data_consistency_checker = Some(AlgorithmConfig {
            kind: "CRC32".into(),
            props: HashMap::new(),
        });

        assert!(matches!(
            create_rule(&repo, &bad).await,
            Err(ConfigError::ValidationFailed(_))
        ));
        assert!(list_rules(&repo).await.unwrap().is_empty());
    }
}
