//! Change-event sources feeding the incremental tasks.

use crate::error::DbError;
use async_trait::async_trait;
use model::{pipeline::position::Position, records::record::DataRecord};

#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    /// A captured row change, in source commit order.
    Record(DataRecord),
    /// End of stream. No further events follow.
    Finished(Position),
}

/// Pulls captured changes from one source shard.
///
/// `poll` returns `Ok(None)` when no event is currently available; callers
/// back off and poll again.
#[async_trait]
pub trait ChangeEventSource: Send {
    async fn poll(&mut self) -> Result<Option<ChangeEvent>, DbError>;
}

/// Opens a change-event source positioned at `position`.
#[async_trait]
pub trait ChangeEventSourceFactory: Send + Sync {
    async fn open(
        &self,
        data_source: &str,
        position: &Position,
    ) -> Result<Box<dyn ChangeEventSource>, DbError>;
}

/// Source that reports end of stream immediately. Used for jobs that only
/// copy the snapshot.
#[derive(Debug, Default)]
pub struct FinishedSource {
    done: bool,
}

#[async_trait]
impl ChangeEventSource for FinishedSource {
    async fn poll(&mut self) -> Result<Option<ChangeEvent>, DbError> {
        if self.done {
            return Ok(None);
        }
        self.done = true;
        Ok(Some(ChangeEvent::Finished(Position::Finished)))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SnapshotOnly;

#[async_trait]
impl ChangeEventSourceFactory for SnapshotOnly {
    async fn open(
        &self,
        _data_source: &str,
        _position: &Position,
    ) -> Result<Box<dyn ChangeEventSource>, DbError> {
        Ok(Box::new(FinishedSource::default()))
    }
}
