use crate::{job::status::JobStatus, pipeline::position::Position};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub task_id: String,
    pub position: Position,
    #[serde(default)]
    pub records: u64,
    /// Time of the last applied change, incremental tasks only.
    #[serde(default)]
    pub last_event_at: Option<DateTime<Utc>>,
}

impl TaskProgress {
    pub fn new(task_id: impl Into<String>, position: Position) -> Self {
        Self {
            task_id: task_id.into(),
            position,
            records: 0,
            last_event_at: None,
        }
    }
}

/// Durable state of one job item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobItemProgress {
    pub status: JobStatus,
    pub data_source: String,
    #[serde(default)]
    pub stopping: bool,
    pub inventory_tasks: Vec<TaskProgress>,
    pub incremental_tasks: Vec<TaskProgress>,
    pub updated_at: DateTime<Utc>,
}

impl JobItemProgress {
    pub fn new(data_source: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Preparing,
            data_source: data_source.into(),
            stopping: false,
            inventory_tasks: Vec::new(),
            incremental_tasks: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn inventory_position(&self, task_id: &str) -> Option<&Position> {
        self.inventory_tasks
            .iter()
            .find(|t| t.task_id == task_id)
            .map(|t| &t.position)
    }

    pub fn incremental_position(&self, task_id: &str) -> Option<&Position> {
        self.incremental_tasks
            .iter()
            .find(|t| t.task_id == task_id)
            .map(|t| &t.position)
    }

    /// Share of inventory tasks at a finished position, 0..=100.
    pub fn inventory_finished_percentage(&self) -> u8 {
        if self.inventory_tasks.is_empty() {
            return 100;
        }
        let finished = self
            .inventory_tasks
            .iter()
            .filter(|t| t.position.is_finished())
            .count();
        (finished * 100 / self.inventory_tasks.len()) as u8
    }

    /// Seconds since the most recent incremental event, if any was applied.
    pub fn incremental_idle_seconds(&self, now: DateTime<Utc>) -> Option<i64> {
        self.incremental_tasks
            .iter()
            .filter_map(|t| t.last_event_at)
            .max()
            .map(|last| (now - last).num_seconds().max(0))
    }
}
