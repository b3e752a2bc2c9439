//! Job-item state machine.
//!
//! `PREPARING -> EXECUTE_INVENTORY_TASK -> EXECUTE_INCREMENTAL_TASK -> FINISHED`,
//! with `ERROR` reachable from both running states. The runner is the only
//! writer of the item's durable state: tasks report progress over a channel
//! and the runner's driver persists every event before doing anything else.

use crate::{
    error::{JobError, TaskError, TaskErrorKind},
    execution::engine::ExecuteEngine,
};
use chrono::Utc;
use connectors::source::ChangeEventSourceFactory;
use engine_core::{
    progress::{ProgressEvent, ProgressReceiver, ProgressReporter, ProgressSender, TaskKind, progress_channel},
    state::job_item::JobItemRepository,
};
use engine_processing::{
    importer::Importer,
    task::{incremental::IncrementalTask, inventory::InventoryTask},
};
use futures::{StreamExt, stream::FuturesUnordered};
use model::{
    job::{
        progress::{JobItemProgress, TaskProgress},
        status::JobStatus,
    },
    pipeline::position::Position,
};
use std::{sync::Arc, time::Duration};
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, warn};

/// How to build one incremental task once the inventory phase is done.
pub struct IncrementalTaskSpec {
    pub task_id: String,
    pub data_source: String,
    pub importer: Arc<Importer>,
    pub batch_size: usize,
    pub idle: Duration,
}

/// The work of one job item, handed to [`TasksRunner::start`].
pub struct JobItemTasks {
    pub inventory: Vec<InventoryTask>,
    pub incremental: Vec<IncrementalTaskSpec>,
    pub change_sources: Arc<dyn ChangeEventSourceFactory>,
}

struct RunnerState {
    progress: JobItemProgress,
    incremental_dispatched: bool,
}

type TaskHandle = (String, JoinHandle<Result<Position, TaskError>>);

pub struct TasksRunner {
    job_id: String,
    item: usize,
    repository: JobItemRepository,
    engine: ExecuteEngine,
    state: Mutex<RunnerState>,
    sender: ProgressSender,
    receiver: Mutex<Option<ProgressReceiver>>,
    driver: Mutex<Option<JoinHandle<JobStatus>>>,
    cancel: CancellationToken,
}

impl TasksRunner {
    pub fn new(
        job_id: impl Into<String>,
        item: usize,
        progress: JobItemProgress,
        repository: JobItemRepository,
        engine: ExecuteEngine,
    ) -> Arc<Self> {
        let (sender, receiver) = progress_channel();
        Arc::new(Self {
            job_id: job_id.into(),
            item,
            repository,
            engine,
            state: Mutex::new(RunnerState {
                progress,
                incremental_dispatched: false,
            }),
            sender,
            receiver: Mutex::new(Some(receiver)),
            driver: Mutex::new(None),
            cancel: CancellationToken::new(),
        })
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn item(&self) -> usize {
        self.item
    }

    /// Reporter for a task of this item. Events reach the runner's driver.
    pub fn reporter(&self, kind: TaskKind, task_id: impl Into<String>) -> ProgressReporter {
        ProgressReporter::new(kind, task_id, self.sender.clone())
    }

    /// Token a task of this item observes; cancelled by [`TasksRunner::stop`].
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    pub async fn progress(&self) -> JobItemProgress {
        self.state.lock().await.progress.clone()
    }

    pub async fn is_active(&self) -> bool {
        self.driver
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Persists the current status and dispatches the item's work. Returns
    /// `false` without doing anything when the item is stopping or was
    /// already started.
    pub async fn start(self: &Arc<Self>, tasks: JobItemTasks) -> Result<bool, JobError> {
        let mut state = self.state.lock().await;
        if state.progress.stopping {
            info!(job_id = %self.job_id, item = self.item, "Job item is stopping, not starting");
            return Ok(false);
        }
        let Some(receiver) = self.receiver.lock().await.take() else {
            info!(job_id = %self.job_id, item = self.item, "Job item already started");
            return Ok(false);
        };

        if !all_finished(&state.progress.inventory_tasks) {
            state.progress.status = JobStatus::ExecuteInventoryTask;
        }
        state.progress.updated_at = Utc::now();
        self.repository
            .persist_progress(&self.job_id, self.item, &state.progress)
            .await?;
        info!(
            job_id = %self.job_id,
            item = self.item,
            status = %state.progress.status,
            "Job item started"
        );
        drop(state);

        let runner = Arc::clone(self);
        let handle = tokio::spawn(
            async move { runner.drive(tasks, receiver).await }.in_current_span(),
        );
        *self.driver.lock().await = Some(handle);
        Ok(true)
    }

    /// Waits for the driver to settle and returns the item's final status.
    /// `None` if the item was never started.
    pub async fn join(&self) -> Result<Option<JobStatus>, JobError> {
        let handle = self.driver.lock().await.take();
        match handle {
            Some(handle) => Ok(Some(handle.await?)),
            None => Ok(None),
        }
    }

    /// Marks the item stopping and cancels every task. Running tasks finish
    /// their in-flight batch and exit.
    pub async fn stop(&self) -> Result<(), JobError> {
        let mut state = self.state.lock().await;
        if !state.progress.stopping {
            state.progress.stopping = true;
            state.progress.updated_at = Utc::now();
            self.repository
                .persist_progress(&self.job_id, self.item, &state.progress)
                .await?;
        }
        drop(state);
        self.cancel.cancel();
        info!(job_id = %self.job_id, item = self.item, "Job item stop requested");
        Ok(())
    }

    async fn drive(self: Arc<Self>, tasks: JobItemTasks, mut receiver: ProgressReceiver) -> JobStatus {
        if let Err(err) = self.run_phases(tasks, &mut receiver).await {
            error!(job_id = %self.job_id, item = self.item, error = %err, "Job item driver failed");
            let failure = TaskError::new("runner", TaskErrorKind::Internal, err.to_string());
            if let Err(err) = self.fail(&failure).await {
                error!(job_id = %self.job_id, item = self.item, error = %err, "Could not persist job item failure");
            }
        }
        self.state.lock().await.progress.status
    }

    async fn run_phases(
        &self,
        tasks: JobItemTasks,
        receiver: &mut ProgressReceiver,
    ) -> Result<(), JobError> {
        let JobItemTasks {
            inventory,
            incremental,
            change_sources,
        } = tasks;

        if !self.inventory_finished().await {
            let handles = self.submit_inventory(inventory);
            if self.await_tasks(TaskKind::Inventory, handles, receiver).await? {
                return Ok(());
            }
            if !self.inventory_finished().await {
                info!(job_id = %self.job_id, item = self.item, "Inventory phase stopped before completion");
                return Ok(());
            }
        }

        if !self.transition_to_incremental().await? {
            return Ok(());
        }

        let handles = match self.submit_incremental(incremental, change_sources.as_ref()).await? {
            Some(handles) => handles,
            None => return Ok(()),
        };
        if self.await_tasks(TaskKind::Incremental, handles, receiver).await? {
            return Ok(());
        }
        self.finish_if_done().await
    }

    fn submit_inventory(&self, tasks: Vec<InventoryTask>) -> Vec<TaskHandle> {
        tasks
            .into_iter()
            .filter(|task| !task.position().is_finished())
            .map(|mut task| {
                let task_id = task.task_id().to_string();
                let id = task_id.clone();
                let handle = self.engine.submit(task_id.clone(), async move {
                    task.run()
                        .await
                        .map_err(|err| TaskError::from_inventory(&id, &err))
                });
                (task_id, handle)
            })
            .collect()
    }

    /// Opens each incremental task's change source at its persisted position.
    async fn submit_incremental(
        &self,
        specs: Vec<IncrementalTaskSpec>,
        change_sources: &dyn ChangeEventSourceFactory,
    ) -> Result<Option<Vec<TaskHandle>>, JobError> {
        let mut handles: Vec<TaskHandle> = Vec::with_capacity(specs.len());
        for spec in specs {
            let position = {
                let state = self.state.lock().await;
                state
                    .progress
                    .incremental_position(&spec.task_id)
                    .cloned()
                    .unwrap_or_default()
            };
            if position.is_finished() {
                continue;
            }
            let source = match change_sources.open(&spec.data_source, &position).await {
                Ok(source) => source,
                Err(err) => {
                    let failure = TaskError::new(&spec.task_id, TaskErrorKind::Transient, err.to_string());
                    self.fail(&failure).await?;
                    for (_, handle) in &handles {
                        handle.abort();
                    }
                    return Ok(None);
                }
            };

            let mut task = IncrementalTask::new(
                spec.task_id.clone(),
                position,
                source,
                spec.importer,
                spec.batch_size,
                spec.idle,
                self.reporter(TaskKind::Incremental, spec.task_id.clone()),
                self.cancellation(),
            );
            let id = spec.task_id.clone();
            let handle = self.engine.submit(spec.task_id.clone(), async move {
                task.run()
                    .await
                    .map_err(|err| TaskError::from_incremental(&id, &err))
            });
            handles.push((spec.task_id, handle));
        }
        Ok(Some(handles))
    }

    /// Applies progress events until every handle has completed. Returns
    /// `true` if a task failed; the item is then in `ERROR`.
    async fn await_tasks(
        &self,
        kind: TaskKind,
        handles: Vec<TaskHandle>,
        receiver: &mut ProgressReceiver,
    ) -> Result<bool, JobError> {
        let mut pending: FuturesUnordered<_> = handles
            .into_iter()
            .map(|(task_id, handle)| async move { (task_id, handle.await) })
            .collect();
        let mut failed = false;

        while !pending.is_empty() {
            tokio::select! {
                Some(event) = receiver.recv() => self.apply_event(event).await?,
                Some((task_id, joined)) = pending.next() => {
                    let result = joined.unwrap_or_else(|err| {
                        Err(TaskError::new(&task_id, TaskErrorKind::Internal, err.to_string()))
                    });
                    match result {
                        Ok(position) => {
                            info!(job_id = %self.job_id, item = self.item, task_id = %task_id, ?kind, %position, "Task completed");
                        }
                        Err(err) if !failed => {
                            failed = true;
                            self.fail(&err).await?;
                        }
                        Err(err) => {
                            warn!(job_id = %self.job_id, item = self.item, error = %err, "Further task failure after stop");
                        }
                    }
                }
                else => break,
            }
        }

        // Everything a finished task reported is already queued.
        while let Ok(event) = receiver.try_recv() {
            self.apply_event(event).await?;
        }
        Ok(failed)
    }

    async fn apply_event(&self, event: ProgressEvent) -> Result<(), JobError> {
        let mut state = self.state.lock().await;
        let progress = &mut state.progress;
        let tasks = match event.kind {
            TaskKind::Inventory => &mut progress.inventory_tasks,
            TaskKind::Incremental => &mut progress.incremental_tasks,
        };
        let index = match tasks.iter().position(|t| t.task_id == event.task_id) {
            Some(index) => index,
            None => {
                tasks.push(TaskProgress::new(event.task_id.clone(), Position::Placeholder));
                tasks.len() - 1
            }
        };
        let task = &mut tasks[index];
        task.position.advance(event.position);
        task.records += event.records;
        if event.kind == TaskKind::Incremental && event.records > 0 {
            task.last_event_at = Some(event.at);
        }
        progress.updated_at = Utc::now();

        self.repository
            .persist_progress(&self.job_id, self.item, progress)
            .await?;
        Ok(())
    }

    async fn inventory_finished(&self) -> bool {
        all_finished(&self.state.lock().await.progress.inventory_tasks)
    }

    /// Refuses while stopping or once incremental work was dispatched.
    async fn transition_to_incremental(&self) -> Result<bool, JobError> {
        let mut state = self.state.lock().await;
        if state.progress.stopping || state.incremental_dispatched {
            return Ok(false);
        }
        state.incremental_dispatched = true;
        state.progress.status = JobStatus::ExecuteIncrementalTask;
        state.progress.updated_at = Utc::now();
        self.repository
            .persist_progress(&self.job_id, self.item, &state.progress)
            .await?;
        info!(job_id = %self.job_id, item = self.item, "Inventory finished, executing incremental tasks");
        Ok(true)
    }

    async fn finish_if_done(&self) -> Result<(), JobError> {
        let mut state = self.state.lock().await;
        if state.progress.stopping || !all_finished(&state.progress.incremental_tasks) {
            return Ok(());
        }
        state.progress.status = JobStatus::Finished;
        state.progress.updated_at = Utc::now();
        self.repository
            .persist_progress(&self.job_id, self.item, &state.progress)
            .await?;
        info!(job_id = %self.job_id, item = self.item, "Job item finished");
        Ok(())
    }

    /// Records the failure, moves the item to `ERROR` and stops its tasks.
    async fn fail(&self, err: &TaskError) -> Result<(), JobError> {
        error!(job_id = %self.job_id, item = self.item, task_id = %err.task_id, kind = %err.kind, error = %err.message, "Task failed");
        let mut state = self.state.lock().await;
        state.progress.status = JobStatus::Error;
        state.progress.stopping = true;
        state.progress.updated_at = Utc::now();
        self.repository
            .persist_error(&self.job_id, self.item, &err.to_string())
            .await?;
        self.repository
            .persist_progress(&self.job_id, self.item, &state.progress)
            .await?;
        drop(state);
        self.cancel.cancel();
        Ok(())
    }
}

fn all_finished(tasks: &[TaskProgress]) -> bool {
    tasks.iter().all(|t| t.position.is_finished())
}

#[cfg(test)]
mod tests {
    use super::*;
    use connectors::source::SnapshotOnly;
    use engine_core::state::memory::MemoryRepository;

    fn repository() -> JobItemRepository {
        JobItemRepository::new(Arc::new(MemoryRepository::new()))
    }

    fn finished_progress() -> JobItemProgress {
        let mut progress = JobItemProgress::new("ds_0");
        progress.inventory_tasks = vec![TaskProgress::new("ds_0.t_order", Position::Finished)];
        progress
    }

    fn no_tasks() -> JobItemTasks {
        JobItemTasks {
            inventory: Vec::new(),
            incremental: Vec::new(),
            change_sources: Arc::new(SnapshotOnly),
        }
    }

    #[tokio::test]
    async fn finished_inventory_goes_straight_to_incremental() {
        let repo = repository();
        let runner = TasksRunner::new("j1", 0, finished_progress(), repo.clone(), ExecuteEngine::new(2));

        assert!(runner.start(no_tasks()).await.unwrap());
        assert_eq!(runner.join().await.unwrap(), Some(JobStatus::Finished));

        let stored = repo.load_progress("j1", 0).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Finished);
    }

    #[tokio::test]
    async fn second_start_is_a_no_op() {
        let runner = TasksRunner::new("j1", 0, finished_progress(), repository(), ExecuteEngine::new(2));

        assert!(runner.start(no_tasks()).await.unwrap());
        assert!(!runner.start(no_tasks()).await.unwrap());
        runner.join().await.unwrap();
    }

    #[tokio::test]
    async fn stopping_item_does_not_start() {
        let repo = repository();
        let runner = TasksRunner::new("j1", 0, finished_progress(), repo.clone(), ExecuteEngine::new(2));

        runner.stop().await.unwrap();
        assert!(!runner.start(no_tasks()).await.unwrap());
        assert_eq!(runner.join().await.unwrap(), None);

        let stored = repo.load_progress("j1", 0).await.unwrap().unwrap();
        assert!(stored.stopping);
        assert_eq!(stored.status, JobStatus::Preparing);
    }
}
