use thiserror::Error;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("Failed to encode `{key}`: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to decode `{key}`: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("Unknown rate limit algorithm `{0}`")]
    UnknownAlgorithm(String),

    #[error("Rate limit `{0}` must be greater than zero")]
    InvalidRate(String),
}
