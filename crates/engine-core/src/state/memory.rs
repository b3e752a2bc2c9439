use crate::{
    error::RepositoryError,
    state::{GovernanceRepository, child_segment, within},
};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::RwLock;

/// Non-durable repository for tests and dry runs.
#[derive(Default)]
pub struct MemoryRepository {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn keys(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }
}

#[async_trait]
impl GovernanceRepository for MemoryRepository {
    async fn persist(&self, key: &str, value: &str) -> Result<(), RepositoryError> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn create(&self, key: &str, value: &str) -> Result<bool, RepositoryError> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, RepositoryError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn children(&self, prefix: &str) -> Result<Vec<String>, RepositoryError> {
        let entries = self.entries.read().await;
        let names: BTreeSet<String> = entries
            .keys()
            .filter_map(|key| child_segment(prefix, key))
            .map(str::to_string)
            .collect();
        Ok(names.into_iter().collect())
    }

    async fn delete(&self, key: &str) -> Result<(), RepositoryError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn delete_tree(&self, prefix: &str) -> Result<(), RepositoryError> {
        self.entries
            .write()
            .await
            .retain(|key, _| !within(prefix, key));
        Ok(())
    }
}
