use engine_core::error::{RateLimitError, RepositoryError};
use thiserror::Error;

/// Errors raised while reading or validating job configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// Every problem found by `validate`, in detection order.
    #[error("Invalid configuration: {}", .0.join("; "))]
    ValidationFailed(Vec<String>),

    #[error("Scaling rule `{0}` already exists")]
    DuplicateRule(String),

    #[error("Unknown check algorithm `{0}`")]
    UnknownCheckAlgorithm(String),

    #[error("Rate limiter error: {0}")]
    RateLimit(#[from] RateLimitError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}
