use crate::{
    error::RepositoryError,
    state::{GovernanceRepository, child_segment, within},
};
use async_trait::async_trait;
use std::{collections::BTreeSet, path::Path};

pub struct SledRepository {
    db: sled::Db,
}

impl SledRepository {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RepositoryError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }
}

#[async_trait]
impl GovernanceRepository for SledRepository {
    async fn persist(&self, key: &str, value: &str) -> Result<(), RepositoryError> {
        self.db.insert(key, value.as_bytes())?;
        self.db.flush_async().await?;
        Ok(())
    }

    async fn create(&self, key: &str, value: &str) -> Result<bool, RepositoryError> {
        // compare_and_swap against "absent" makes check-then-set atomic.
        let swapped = self
            .db
            .compare_and_swap(key, None as Option<&[u8]>, Some(value.as_bytes()))?;
        if swapped.is_err() {
            return Ok(false);
        }
        self.db.flush_async().await?;
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, RepositoryError> {
        match self.db.get(key)? {
            Some(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            None => Ok(None),
        }
    }

    async fn children(&self, prefix: &str) -> Result<Vec<String>, RepositoryError> {
        let mut names = BTreeSet::new();
        for item in self.db.scan_prefix(prefix) {
            let (key, _) = item?;
            let key = String::from_utf8_lossy(&key);
            if let Some(segment) = child_segment(prefix, &key) {
                names.insert(segment.to_string());
            }
        }
        Ok(names.into_iter().collect())
    }

    async fn delete(&self, key: &str) -> Result<(), RepositoryError> {
        self.db.remove(key)?;
        self.db.flush_async().await?;
        Ok(())
    }

    async fn delete_tree(&self, prefix: &str) -> Result<(), RepositoryError> {
        let mut batch = sled::Batch::default();
        for item in self.db.scan_prefix(prefix) {
            let (key, _) = item?;
            if within(prefix, &String::from_utf8_lossy(&key)) {
                batch.remove(key);
            }
        }
        self.db.apply_batch(batch)?;
        self.db.flush_async().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn persists_and_lists_children() {
        let dir = tempdir().unwrap();
        let repo = SledRepository::open(dir.path()).unwrap();

        repo.persist("/pipeline/jobs/j1/config", "{}").await.unwrap();
        repo.persist("/pipeline/jobs/j1/items/0/progress", "{}")
            .await
            .unwrap();
        repo.persist("/pipeline/jobs/j1/items/1/progress", "{}")
            .await
            .unwrap();
        repo.persist("/pipeline/jobs/j10/config", "{}").await.unwrap();

        assert_eq!(
            repo.children("/pipeline/jobs").await.unwrap(),
            vec!["j1", "j10"]
        );
        assert_eq!(
            repo.children("/pipeline/jobs/j1/items").await.unwrap(),
            vec!["0", "1"]
        );
    }

    #[tokio::test]
    async fn delete_tree_keeps_sibling_with_common_prefix() {
        let dir = tempdir().unwrap();
        let repo = SledRepository::open(dir.path()).unwrap();

        repo.persist("/pipeline/jobs/j1/config", "a").await.unwrap();
        repo.persist("/pipeline/jobs/j10/config", "b").await.unwrap();
        repo.delete_tree("/pipeline/jobs/j1").await.unwrap();

        assert_eq!(repo.get("/pipeline/jobs/j1/config").await.unwrap(), None);
        assert_eq!(
            repo.get("/pipeline/jobs/j10/config").await.unwrap(),
            Some("b".to_string())
        );
    }

    #[tokio::test]
    async fn create_refuses_existing_key() {
        let dir = tempdir().unwrap();
        let repo = SledRepository::open(dir.path()).unwrap();

        assert!(repo.create("/pipeline/rules/default", "1").await.unwrap());
        assert!(!repo.create("/pipeline/rules/default", "2").await.unwrap());
        assert_eq!(
            repo.get("/pipeline/rules/default").await.unwrap(),
            Some("1".to_string())
        );
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let repo = SledRepository::open(dir.path()).unwrap();
            repo.persist("/pipeline/jobs/j1/items/0/error", "boom")
                .await
                .unwrap();
        }
        let repo = SledRepository::open(dir.path()).unwrap();
        assert_eq!(
            repo.get("/pipeline/jobs/j1/items/0/error").await.unwrap(),
            Some("boom".to_string())
        );
    }
}
