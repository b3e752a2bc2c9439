use crate::{
    error::RepositoryError,
    state::{GovernanceRepository, keys},
};
use model::job::progress::JobItemProgress;
use serde::{Serialize, de::DeserializeOwned};
use std::sync::Arc;
use tracing::{debug, info};

/// Typed access to the durable state of jobs, their items and scaling rules.
#[derive(Clone)]
pub struct JobItemRepository {
    repository: Arc<dyn GovernanceRepository>,
}

impl JobItemRepository {
    pub fn new(repository: Arc<dyn GovernanceRepository>) -> Self {
        Self { repository }
    }

    pub fn repository(&self) -> &Arc<dyn GovernanceRepository> {
        &self.repository
    }

    pub async fn persist_config<C: Serialize>(
        &self,
        job_id: &str,
        config: &C,
    ) -> Result<(), RepositoryError> {
        self.persist_json(&keys::job_config(job_id), config).await
    }

    pub async fn load_config<C: DeserializeOwned>(
        &self,
        job_id: &str,
    ) -> Result<Option<C>, RepositoryError> {
        self.load_json(&keys::job_config(job_id)).await
    }

    pub async fn persist_progress(
        &self,
        job_id: &str,
        item: usize,
        progress: &JobItemProgress,
    ) -> Result<(), RepositoryError> {
        debug!(job_id, item, status = %progress.status, "Persisting job item progress");
        self.persist_json(&keys::job_item_progress(job_id, item), progress)
            .await
    }

    pub async fn load_progress(
        &self,
        job_id: &str,
        item: usize,
    ) -> Result<Option<JobItemProgress>, RepositoryError> {
        self.load_json(&keys::job_item_progress(job_id, item)).await
    }

    pub async fn persist_error(
        &self,
        job_id: &str,
        item: usize,
        message: &str,
    ) -> Result<(), RepositoryError> {
        self.repository
            .persist(&keys::job_item_error(job_id, item), message)
            .await
    }

    pub async fn load_error(
        &self,
        job_id: &str,
        item: usize,
    ) -> Result<Option<String>, RepositoryError> {
        self.repository
            .get(&keys::job_item_error(job_id, item))
            .await
    }

    pub async fn clean_error(&self, job_id: &str, item: usize) -> Result<(), RepositoryError> {
        self.repository
            .delete(&keys::job_item_error(job_id, item))
            .await
    }

    /// Item indexes with persisted state, ascending.
    pub async fn item_indexes(&self, job_id: &str) -> Result<Vec<usize>, RepositoryError> {
        let mut items: Vec<usize> = self
            .repository
            .children(&keys::job_items(job_id))
            .await?
            .iter()
            .filter_map(|name| name.parse().ok())
            .collect();
        items.sort_unstable();
        Ok(items)
    }

    pub async fn job_ids(&self) -> Result<Vec<String>, RepositoryError> {
        self.repository.children(keys::JOBS).await
    }

    pub async fn drop_job(&self, job_id: &str) -> Result<(), RepositoryError> {
        self.repository.delete_tree(&keys::job(job_id)).await?;
        info!(job_id, "Dropped job state");
        Ok(())
    }

    /// Stores a rule under its name. Returns `false` when the name is taken.
    pub async fn create_rule<R: Serialize>(
        &self,
        name: &str,
        rule: &R,
    ) -> Result<bool, RepositoryError> {
        let key = keys::rule(name);
        let json = encode(&key, rule)?;
        self.repository.create(&key, &json).await
    }

    pub async fn load_rule<R: DeserializeOwned>(
        &self,
        name: &str,
    ) -> Result<Option<R>, RepositoryError> {
        self.load_json(&keys::rule(name)).await
    }

    pub async fn rule_names(&self) -> Result<Vec<String>, RepositoryError> {
        self.repository.children(keys::RULES).await
    }

    async fn persist_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), RepositoryError> {
        let json = encode(key, value)?;
        self.repository.persist(key, &json).await
    }

    async fn load_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, RepositoryError> {
        let Some(json) = self.repository.get(key).await? else {
            return Ok(None);
        };
        serde_json::from_str(&json)
            .map(Some)
            .map_err(|source| RepositoryError::Decode {
                key: key.to_string(),
                source,
            })
    }
}

fn encode<T: Serialize>(key: &str, value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|source| RepositoryError::Encode {
        key: key.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{memory::MemoryRepository, sled_store::SledRepository};
    use model::{
        job::{progress::TaskProgress, status::JobStatus},
        pipeline::position::{KeyBound, Position},
    };
    use tempfile::tempdir;

    fn progress() -> JobItemProgress {
        let mut progress = JobItemProgress::new("ds_0");
        progress.status = JobStatus::ExecuteInventoryTask;
        progress.inventory_tasks = vec![TaskProgress::new(
            "t_order#0",
            Position::range(Some(KeyBound::Integer(42)), Some(KeyBound::Integer(100))),
        )];
        progress
    }

    #[tokio::test]
    async fn progress_round_trips_through_sled() {
        let dir = tempdir().unwrap();
        let repo = JobItemRepository::new(Arc::new(SledRepository::open(dir.path()).unwrap()));

        let expected = progress();
        repo.persist_progress("j1", 0, &expected).await.unwrap();

        assert_eq!(repo.load_progress("j1", 0).await.unwrap(), Some(expected));
        assert_eq!(repo.load_progress("j1", 1).await.unwrap(), None);
        assert_eq!(repo.item_indexes("j1").await.unwrap(), vec![0]);
    }

    #[tokio::test]
    async fn error_can_be_cleaned() {
        let repo = JobItemRepository::new(Arc::new(MemoryRepository::new()));

        repo.persist_error("j1", 2, "connection reset").await.unwrap();
        assert_eq!(
            repo.load_error("j1", 2).await.unwrap().as_deref(),
            Some("connection reset")
        );

        repo.clean_error("j1", 2).await.unwrap();
        assert_eq!(repo.load_error("j1", 2).await.unwrap(), None);
    }

    #[tokio::test]
    async fn drop_job_removes_every_key_of_the_job() {
        let memory = Arc::new(MemoryRepository::new());
        let repo = JobItemRepository::new(memory.clone());

        repo.persist_config("j1", &serde_json::json!({"tables": []}))
            .await
            .unwrap();
        repo.persist_progress("j1", 0, &progress()).await.unwrap();
        repo.persist_error("j1", 0, "boom").await.unwrap();
        repo.persist_progress("j2", 0, &progress()).await.unwrap();

        repo.drop_job("j1").await.unwrap();

        assert_eq!(memory.keys().await, vec!["/pipeline/jobs/j2/items/0/progress"]);
        assert_eq!(repo.job_ids().await.unwrap(), vec!["j2"]);
    }

    #[tokio::test]
    async fn rule_names_are_unique() {
        let repo = JobItemRepository::new(Arc::new(MemoryRepository::new()));
        let rule = serde_json::json!({"name": "default"});

        assert!(repo.create_rule("default", &rule).await.unwrap());
        assert!(!repo.create_rule("default", &rule).await.unwrap());
        assert_eq!(repo.rule_names().await.unwrap(), vec!["default"]);
    }

    #[tokio::test]
    async fn corrupt_progress_reports_key() {
        let memory = Arc::new(MemoryRepository::new());
        memory
            .persist("/pipeline/jobs/j1/items/0/progress", "not json")
            .await
            .unwrap();
        let repo = JobItemRepository::new(memory);

        let err = repo.load_progress("j1", 0).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Decode { ref key, .. } if key.ends_with("/progress")));
    }
}
