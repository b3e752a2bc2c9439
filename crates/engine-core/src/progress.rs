//! Progress messages sent from running tasks to their tasks runner.
//!
//! Tasks never write durable state themselves; they report here and the
//! runner, as the single consumer, persists.

use chrono::{DateTime, Utc};
use model::pipeline::position::Position;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Inventory,
    Incremental,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub kind: TaskKind,
    pub task_id: String,
    /// Position up to which everything has been applied to the target.
    pub position: Position,
    /// Records applied by the batch this event reports.
    pub records: u64,
    pub at: DateTime<Utc>,
}

pub type ProgressSender = mpsc::UnboundedSender<ProgressEvent>;
pub type ProgressReceiver = mpsc::UnboundedReceiver<ProgressEvent>;

pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Per-task handle for reporting progress.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    kind: TaskKind,
    task_id: String,
    sender: Option<ProgressSender>,
}

impl ProgressReporter {
    pub fn new(kind: TaskKind, task_id: impl Into<String>, sender: ProgressSender) -> Self {
        Self {
            kind,
            task_id: task_id.into(),
            sender: Some(sender),
        }
    }

    /// Reporter that drops every event.
    pub fn detached(kind: TaskKind, task_id: impl Into<String>) -> Self {
        Self {
            kind,
            task_id: task_id.into(),
            sender: None,
        }
    }

    pub fn report(&self, position: Position, records: u64) {
        let Some(sender) = &self.sender else {
            return;
        };
        let event = ProgressEvent {
            kind: self.kind,
            task_id: self.task_id.clone(),
            position,
            records,
            at: Utc::now(),
        };
        if sender.send(event).is_err() {
            debug!(task_id = %self.task_id, "Progress receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_reach_receiver_in_order() {
        let (tx, mut rx) = progress_channel();
        let reporter = ProgressReporter::new(TaskKind::Inventory, "t_order#0", tx);
        reporter.report(Position::Placeholder, 0);
        reporter.report(Position::Finished, 3);
        drop(reporter);

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.position, Position::Placeholder);
        assert_eq!(second.position, Position::Finished);
        assert_eq!(second.records, 3);
        assert!(rx.recv().await.is_none());
    }
}
