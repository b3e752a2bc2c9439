//! Durable key-value state of the pipeline.

use crate::error::RepositoryError;
use async_trait::async_trait;

pub mod job_item;
pub mod keys;
pub mod memory;
pub mod sled_store;

/// Hierarchical key-value store holding job configuration, progress and
/// errors. Keys are `/`-separated paths; values are JSON documents.
#[async_trait]
pub trait GovernanceRepository: Send + Sync {
    /// Writes `value` under `key`, replacing any previous value. The write is
    /// durable when this returns.
    async fn persist(&self, key: &str, value: &str) -> Result<(), RepositoryError>;

    /// Writes `value` only if `key` is absent. Returns whether it was written.
    async fn create(&self, key: &str, value: &str) -> Result<bool, RepositoryError>;

    async fn get(&self, key: &str) -> Result<Option<String>, RepositoryError>;

    /// Names of the direct children of `prefix`, sorted.
    async fn children(&self, prefix: &str) -> Result<Vec<String>, RepositoryError>;

    async fn delete(&self, key: &str) -> Result<(), RepositoryError>;

    /// Removes `prefix` and everything below it.
    async fn delete_tree(&self, prefix: &str) -> Result<(), RepositoryError>;
}

/// Extracts the direct child segment of `key` below `prefix`.
pub(crate) fn child_segment<'a>(prefix: &str, key: &'a str) -> Option<&'a str> {
    let rest = key.strip_prefix(prefix)?.strip_prefix('/')?;
    rest.split('/').next().filter(|segment| !segment.is_empty())
}

/// True when `key` is `prefix` itself or lies below it.
pub(crate) fn within(prefix: &str, key: &str) -> bool {
    key == prefix
        || key
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}
