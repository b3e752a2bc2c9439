use connectors::error::ConnectorError;
use engine_config::error::ConfigError;
use engine_core::error::RepositoryError;
use engine_processing::error::{CheckError, ImporterError, IncrementalError, InventoryError};
use planner::query::registry::DialectError;
use std::fmt;
use thiserror::Error;

/// Errors of the operator-facing job API.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job '{0}' does not exist")]
    NotFound(String),

    #[error("Job configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Durable state error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Connector error: {0}")]
    Connector(#[from] ConnectorError),

    #[error("Dialect error: {0}")]
    Dialect(#[from] DialectError),

    #[error("Consistency check failed: {0}")]
    Check(#[from] CheckError),

    #[error("Change event source of '{data_source}' could not be opened: {message}")]
    ChangeSource {
        data_source: String,
        message: String,
    },

    #[error("Task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskErrorKind {
    /// Database I/O. Recoverable by an operator restart.
    Transient,
    SchemaMismatch,
    UnsupportedKey,
    Internal,
}

impl fmt::Display for TaskErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TaskErrorKind::Transient => "transient",
            TaskErrorKind::SchemaMismatch => "schema mismatch",
            TaskErrorKind::UnsupportedKey => "unsupported key",
            TaskErrorKind::Internal => "internal",
        })
    }
}

/// A task failure as seen by the tasks runner.
#[derive(Debug, Clone, Error)]
#[error("Task '{task_id}' failed ({kind}): {message}")]
pub struct TaskError {
    pub task_id: String,
    pub kind: TaskErrorKind,
    pub message: String,
}

impl TaskError {
    pub fn new(task_id: impl Into<String>, kind: TaskErrorKind, message: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            kind,
            message: message.into(),
        }
    }

    pub fn from_inventory(task_id: &str, err: &InventoryError) -> Self {
        let kind = match err {
            InventoryError::UnsupportedKeyType { .. } => TaskErrorKind::UnsupportedKey,
            InventoryError::SchemaMismatch { .. }
            | InventoryError::MissingUniqueKey { .. }
            | InventoryError::Metadata { .. } => TaskErrorKind::SchemaMismatch,
            InventoryError::InvalidKeyValue { .. } => TaskErrorKind::Internal,
            InventoryError::Read { .. } => TaskErrorKind::Transient,
            InventoryError::Import(err) => importer_kind(err),
        };
        Self::new(task_id, kind, err.to_string())
    }

    pub fn from_incremental(task_id: &str, err: &IncrementalError) -> Self {
        let kind = match err {
            IncrementalError::Source(_) => TaskErrorKind::Transient,
            IncrementalError::Merge(_) => TaskErrorKind::SchemaMismatch,
            IncrementalError::Import(err) => importer_kind(err),
        };
        Self::new(task_id, kind, err.to_string())
    }

    pub fn is_fatal(&self) -> bool {
        self.kind != TaskErrorKind::Transient
    }
}

fn importer_kind(err: &ImporterError) -> TaskErrorKind {
    match err {
        ImporterError::Write { .. } | ImporterError::Connector(_) => TaskErrorKind::Transient,
        ImporterError::SchemaMismatch { .. } | ImporterError::Metadata { .. } => {
            TaskErrorKind::SchemaMismatch
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_inventory_failures() {
        let err = InventoryError::UnsupportedKeyType {
            table: "t_order".into(),
            column: "created_at".into(),
            data_type: "Timestamp".into(),
        };
        let task = TaskError::from_inventory("ds_0.t_order", &err);
        assert_eq!(task.kind, TaskErrorKind::UnsupportedKey);
        assert!(task.is_fatal());
        assert!(task.to_string().contains("created_at"));

        let err = InventoryError::Import(ImporterError::SchemaMismatch {
            table: "t_order".into(),
            column: "coupon".into(),
        });
        assert_eq!(
            TaskError::from_inventory("ds_0.t_order", &err).kind,
            TaskErrorKind::SchemaMismatch
        );

        let err = InventoryError::MissingUniqueKey {
            table: "t_log".into(),
        };
        let task = TaskError::from_inventory("ds_0.t_log", &err);
        assert_eq!(task.kind, TaskErrorKind::SchemaMismatch);
        assert!(task.is_fatal());
    }
}
