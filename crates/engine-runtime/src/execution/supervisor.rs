//! Operator-facing job API: schedule, start, status, check, stop, drop.

use crate::{
    error::JobError,
    execution::{
        engine::ExecuteEngine,
        factory::Collaborators,
        runner::{IncrementalTaskSpec, JobItemTasks, TasksRunner},
    },
};
use chrono::Utc;
use connectors::{
    connection::{ConnectionFactory, DataSourceConfig},
    source::ChangeEventSourceFactory,
};
use engine_config::{
    check::CheckAlgorithm,
    importer::ImporterConfiguration,
    job::JobConfiguration,
    rule::{self, ScalingRule},
};
use engine_core::{
    progress::TaskKind,
    rate_limit::RateLimitAlgorithm,
    state::job_item::JobItemRepository,
};
use engine_processing::{
    check::{CheckEndpoint, ConsistencyChecker},
    importer::Importer,
    task::inventory::{InventoryTask, InventoryTaskConfig},
};
use model::{
    job::{
        progress::{JobItemProgress, TaskProgress},
        report::{JobItemStatusRow, TableCheckResult},
        status::JobStatus,
    },
    pipeline::position::Position,
};
use planner::query::{ast::common::TableRef, cache::StatementCache, registry::dialect_for};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

pub fn inventory_task_id(data_source: &str, actual_table: &str) -> String {
    format!("{data_source}.{actual_table}")
}

pub fn incremental_task_id(data_source: &str) -> String {
    format!("{data_source}.incremental")
}

/// Owns the runners of every job started in this process.
pub struct JobSupervisor {
    repository: JobItemRepository,
    collaborators: Arc<dyn Collaborators>,
    jobs: Mutex<HashMap<String, Vec<Arc<TasksRunner>>>>,
}

/// Everything the tasks of one job item share.
struct ItemResources<'a> {
    config: &'a JobConfiguration,
    connections: &'a Arc<dyn ConnectionFactory>,
    change_sources: &'a Arc<dyn ChangeEventSourceFactory>,
    importer: &'a Arc<Importer>,
    read_limiter: &'a Option<Arc<dyn RateLimitAlgorithm>>,
}

impl JobSupervisor {
    pub fn new(repository: JobItemRepository, collaborators: Arc<dyn Collaborators>) -> Self {
        Self {
            repository,
            collaborators,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    pub fn repository(&self) -> &JobItemRepository {
        &self.repository
    }

    /// Validates and stores the job, creating one item per source shard.
    /// Items that already have progress are left untouched, so scheduling
    /// the same configuration again resumes it.
    pub async fn schedule(&self, config: JobConfiguration) -> Result<String, JobError> {
        config.validate()?;
        let config = config.with_job_id();
        let job_id = config.job_id();

        self.repository.persist_config(&job_id, &config).await?;
        for (item, source) in config.sources.iter().enumerate() {
            if self.repository.load_progress(&job_id, item).await?.is_some() {
                continue;
            }
            let progress = initial_progress(&config, source);
            self.repository
                .persist_progress(&job_id, item, &progress)
                .await?;
        }

        info!(job_id = %job_id, items = config.sources.len(), "Scheduled job");
        Ok(job_id)
    }

    pub async fn job_ids(&self) -> Result<Vec<String>, JobError> {
        Ok(self.repository.job_ids().await?)
    }

    pub async fn load_job(&self, job_id: &str) -> Result<JobConfiguration, JobError> {
        self.repository
            .load_config(job_id)
            .await?
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))
    }

    /// Starts every item of the job from its persisted progress. Items left
    /// in `ERROR` or stopping are cleared first; this is the operator retry.
    pub async fn start(&self, job_id: &str) -> Result<(), JobError> {
        let config = self.load_job(job_id).await?;
        let mut jobs = self.jobs.lock().await;
        if let Some(runners) = jobs.get(job_id) {
            for runner in runners {
                if runner.is_active().await {
                    info!(job_id, "Job already running");
                    return Ok(());
                }
            }
        }

        let engine = ExecuteEngine::new(config.read.worker_threads);
        let connections = self.collaborators.connection_factory(&config);
        let change_sources = self.collaborators.change_sources(&config);

        let target = connections.get_connection(&config.target.name).await?;
        let target_metadata = self
            .collaborators
            .metadata_loader(&config.target, Arc::clone(&target));
        let importer = Arc::new(Importer::new(
            ImporterConfiguration::from_job(&config)?,
            target,
            target_metadata,
            dialect_for(&config.target.database_type)?,
        ));
        let read_limiter = config.read_rate_limiter()?;
        let resources = ItemResources {
            config: &config,
            connections: &connections,
            change_sources: &change_sources,
            importer: &importer,
            read_limiter: &read_limiter,
        };

        // Every item's tasks are built before any item starts, so a bad
        // source leaves nothing running.
        let mut prepared = Vec::with_capacity(config.sources.len());
        for (item, source) in config.sources.iter().enumerate() {
            let mut progress = self
                .repository
                .load_progress(job_id, item)
                .await?
                .unwrap_or_else(|| initial_progress(&config, source));
            progress.stopping = false;
            let retry = progress.status == JobStatus::Error;
            if retry {
                progress.status = JobStatus::Preparing;
            }

            let runner = TasksRunner::new(
                job_id,
                item,
                progress.clone(),
                self.repository.clone(),
                engine.clone(),
            );
            let tasks = self
                .build_tasks(&resources, source, &progress, &runner)
                .await?;
            prepared.push((runner, tasks, retry));
        }

        let mut runners: Vec<Arc<TasksRunner>> = Vec::with_capacity(prepared.len());
        for (runner, tasks, retry) in prepared {
            let started = self.launch(job_id, &runner, tasks, retry).await;
            if let Err(err) = started {
                error!(job_id, item = runner.item(), error = %err, "Failed to start job item");
                for started in &runners {
                    self.halt(started).await;
                }
                return Err(err);
            }
            runners.push(runner);
        }

        info!(job_id, items = runners.len(), workers = engine.workers(), "Started job");
        jobs.insert(job_id.to_string(), runners);
        Ok(())
    }

    async fn launch(
        &self,
        job_id: &str,
        runner: &Arc<TasksRunner>,
        tasks: JobItemTasks,
        retry: bool,
    ) -> Result<(), JobError> {
        if retry {
            self.repository.clean_error(job_id, runner.item()).await?;
        }
        runner.start(tasks).await?;
        Ok(())
    }

    /// Best effort: the caller is already returning an error.
    async fn halt(&self, runner: &TasksRunner) {
        if let Err(err) = runner.stop().await {
            warn!(item = runner.item(), error = %err, "Failed to stop job item");
        }
        if let Err(err) = runner.join().await {
            warn!(item = runner.item(), error = %err, "Failed to join job item");
        }
    }

    async fn build_tasks(
        &self,
        resources: &ItemResources<'_>,
        source: &DataSourceConfig,
        progress: &JobItemProgress,
        runner: &TasksRunner,
    ) -> Result<JobItemTasks, JobError> {
        let config = resources.config;
        let connection = resources.connections.get_connection(&source.name).await?;
        let metadata = self
            .collaborators
            .metadata_loader(source, Arc::clone(&connection));
        let statements = Arc::new(StatementCache::new(dialect_for(&source.database_type)?));

        let inventory = config
            .data_nodes(&source.name)
            .into_iter()
            .map(|node| {
                let task_id = inventory_task_id(&source.name, &node.actual_table);
                let position = progress
                    .inventory_position(&task_id)
                    .cloned()
                    .unwrap_or_default();
                let task_config = InventoryTaskConfig {
                    task_id: task_id.clone(),
                    schema: config.schema_name(&node.logic_table).map(str::to_string),
                    logic_table: node.logic_table,
                    actual_table: node.actual_table,
                    unique_key: node.unique_key,
                    batch_size: config.read.batch_size,
                };
                InventoryTask::new(
                    task_config,
                    position,
                    Arc::clone(&connection),
                    Arc::clone(&metadata),
                    Arc::clone(&statements),
                    Arc::clone(resources.importer),
                    runner.reporter(TaskKind::Inventory, task_id),
                    runner.cancellation(),
                )
                .with_rate_limiter(resources.read_limiter.clone())
            })
            .collect();

        let incremental = if config.incremental.enabled {
            vec![IncrementalTaskSpec {
                task_id: incremental_task_id(&source.name),
                data_source: source.name.clone(),
                importer: Arc::clone(resources.importer),
                batch_size: config.incremental.batch_size,
                idle: Duration::from_millis(config.incremental.idle_millis),
            }]
        } else {
            Vec::new()
        };

        Ok(JobItemTasks {
            inventory,
            incremental,
            change_sources: Arc::clone(resources.change_sources),
        })
    }

    /// Rows of `SHOW SCALING STATUS`, one per job item.
    pub async fn status(&self, job_id: &str) -> Result<Vec<JobItemStatusRow>, JobError> {
        let config = self.load_job(job_id).await?;
        let runners = self.runners(job_id).await;
        let now = Utc::now();

        let mut rows = Vec::with_capacity(config.sources.len());
        for (item, source) in config.sources.iter().enumerate() {
            let progress = self
                .repository
                .load_progress(job_id, item)
                .await?
                .unwrap_or_else(|| JobItemProgress::new(source.name.clone()));
            let active = match runners.iter().find(|r| r.item() == item) {
                Some(runner) => runner.is_active().await,
                None => false,
            };
            rows.push(JobItemStatusRow {
                item,
                data_source: progress.data_source.clone(),
                status: progress.status,
                active,
                inventory_finished_percentage: progress.inventory_finished_percentage(),
                incremental_idle_seconds: progress.incremental_idle_seconds(now),
                error_message: self.repository.load_error(job_id, item).await?,
            });
        }
        Ok(rows)
    }

    /// Rows of `CHECK SCALING`, one per logical table. Uses the job's
    /// configured algorithm unless one is given.
    pub async fn check(
        &self,
        job_id: &str,
        algorithm: Option<CheckAlgorithm>,
    ) -> Result<Vec<TableCheckResult>, JobError> {
        let config = self.load_job(job_id).await?;
        let checker = ConsistencyChecker::new(
            algorithm.unwrap_or(config.check_algorithm),
            config.read.batch_size,
        );
        let connections = self.collaborators.connection_factory(&config);

        let mut shards = Vec::with_capacity(config.sources.len());
        for source in &config.sources {
            shards.push((source, self.endpoint(&connections, source).await?));
        }
        let target = self.endpoint(&connections, &config.target).await?;

        let mut results = Vec::with_capacity(config.tables.len());
        for table in &config.tables {
            let schema = config.schema_name(&table.logic_table).map(str::to_string);
            let mut sources = Vec::new();
            for (source, endpoint) in &shards {
                sources.extend(
                    config
                        .data_nodes(&source.name)
                        .into_iter()
                        .filter(|node| node.logic_table == table.logic_table)
                        .map(|node| CheckEndpoint {
                            table: TableRef::new(schema.clone(), node.actual_table),
                            ..endpoint.clone()
                        }),
                );
            }
            let target = CheckEndpoint {
                table: TableRef::new(schema, table.logic_table.clone()),
                ..target.clone()
            };
            results.push(checker.check(&table.logic_table, &sources, &target).await?);
        }
        info!(job_id, algorithm = %checker.algorithm(), tables = results.len(), "Checked job");
        Ok(results)
    }

    async fn endpoint(
        &self,
        connections: &Arc<dyn ConnectionFactory>,
        data_source: &DataSourceConfig,
    ) -> Result<CheckEndpoint, JobError> {
        let connection = connections.get_connection(&data_source.name).await?;
        Ok(CheckEndpoint {
            metadata: self
                .collaborators
                .metadata_loader(data_source, Arc::clone(&connection)),
            statements: Arc::new(StatementCache::new(dialect_for(&data_source.database_type)?)),
            connection,
            table: TableRef::new(None, String::new()),
        })
    }

    /// Stops every item and waits for their tasks to exit. Items of a job
    /// not running here are only marked stopping.
    pub async fn stop(&self, job_id: &str) -> Result<(), JobError> {
        let runners = self.runners(job_id).await;
        if runners.is_empty() {
            let config = self.load_job(job_id).await?;
            for item in 0..config.sources.len() {
                if let Some(mut progress) = self.repository.load_progress(job_id, item).await? {
                    progress.stopping = true;
                    progress.updated_at = Utc::now();
                    self.repository
                        .persist_progress(job_id, item, &progress)
                        .await?;
                }
            }
        } else {
            for runner in &runners {
                runner.stop().await?;
            }
            for runner in &runners {
                runner.join().await?;
            }
        }
        info!(job_id, "Stopped job");
        Ok(())
    }

    /// Waits until every item of the job has settled and returns their
    /// final statuses in item order.
    pub async fn wait(&self, job_id: &str) -> Result<Vec<JobStatus>, JobError> {
        let mut statuses = Vec::new();
        for runner in self.runners(job_id).await {
            let status = match runner.join().await? {
                Some(status) => status,
                None => runner.progress().await.status,
            };
            statuses.push(status);
        }
        Ok(statuses)
    }

    /// Stops the job and deletes all of its durable state.
    pub async fn drop_job(&self, job_id: &str) -> Result<(), JobError> {
        self.load_job(job_id).await?;
        self.stop(job_id).await?;
        self.jobs.lock().await.remove(job_id);
        self.repository.drop_job(job_id).await?;
        Ok(())
    }

    pub async fn create_rule(&self, rule: &ScalingRule) -> Result<(), JobError> {
        Ok(rule::create_rule(&self.repository, rule).await?)
    }

    pub async fn list_rules(&self) -> Result<Vec<ScalingRule>, JobError> {
        Ok(rule::list_rules(&self.repository).await?)
    }

    async fn runners(&self, job_id: &str) -> Vec<Arc<TasksRunner>> {
        self.jobs
            .lock()
            .await
            .get(job_id)
            .cloned()
            .unwrap_or_default()
    }
}

fn initial_progress(config: &JobConfiguration, source: &DataSourceConfig) -> JobItemProgress {
    let mut progress = JobItemProgress::new(source.name.clone());
    progress.inventory_tasks = config
        .data_nodes(&source.name)
        .iter()
        .map(|node| {
            TaskProgress::new(
                inventory_task_id(&source.name, &node.actual_table),
                Position::Placeholder,
            )
        })
        .collect();
    if config.incremental.enabled {
        progress.incremental_tasks = vec![TaskProgress::new(
            incremental_task_id(&source.name),
            Position::Placeholder,
        )];
    }
    progress
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_progress_has_one_task_per_actual_table() {
        let config = JobConfiguration::from_json(
            r#"{
                "sources": [
                    {"name": "ds_0", "database_type": "MySQL", "url": "mysql://localhost/ds_0"},
                    {"name": "ds_1", "database_type": "MySQL", "url": "mysql://localhost/ds_1"}
                ],
                "target": {"name": "target", "database_type": "PostgreSQL", "url": "postgres://localhost/t"},
                "tables": [{"logic_table": "t_order", "actual_tables": {"ds_0": ["t_order_0", "t_order_1"], "ds_1": ["t_order_2"]}}]
            }"#,
        )
        .unwrap();

        let progress = initial_progress(&config, &config.sources[0]);
        let ids: Vec<_> = progress.inventory_tasks.iter().map(|t| t.task_id.as_str()).collect();
        assert_eq!(ids, vec!["ds_0.t_order_0", "ds_0.t_order_1"]);
        assert_eq!(progress.incremental_tasks[0].task_id, "ds_0.incremental");
        assert_eq!(progress.status, JobStatus::Preparing);
    }
}
