use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a job item.
///
/// `Preparing -> ExecuteInventoryTask -> ExecuteIncrementalTask -> Finished`,
/// with `Error` reachable from both running states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    #[default]
    Preparing,
    ExecuteInventoryTask,
    ExecuteIncrementalTask,
    Finished,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Preparing => "PREPARING",
            JobStatus::ExecuteInventoryTask => "EXECUTE_INVENTORY_TASK",
            JobStatus::ExecuteIncrementalTask => "EXECUTE_INCREMENTAL_TASK",
            JobStatus::Finished => "FINISHED",
            JobStatus::Error => "ERROR",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(
            self,
            JobStatus::ExecuteInventoryTask | JobStatus::ExecuteIncrementalTask
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
