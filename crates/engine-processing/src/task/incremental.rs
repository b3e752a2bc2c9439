use crate::{error::IncrementalError, importer::Importer, merger};
use connectors::source::{ChangeEvent, ChangeEventSource};
use engine_core::progress::ProgressReporter;
use model::{pipeline::position::Position, records::record::DataRecord};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Replays the change stream of one source shard onto the target.
///
/// Records are pulled in windows of `batch_size`, merged, written, and only
/// then is the position of the window's last record reported. A stop
/// request is honoured between windows, never inside one.
pub struct IncrementalTask {
    task_id: String,
    position: Position,
    source: Box<dyn ChangeEventSource>,
    importer: Arc<Importer>,
    batch_size: usize,
    idle: Duration,
    reporter: ProgressReporter,
    cancel: CancellationToken,
}

impl IncrementalTask {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        task_id: impl Into<String>,
        position: Position,
        source: Box<dyn ChangeEventSource>,
        importer: Arc<Importer>,
        batch_size: usize,
        idle: Duration,
        reporter: ProgressReporter,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            position,
            source,
            importer,
            batch_size: batch_size.max(1),
            idle,
            reporter,
            cancel,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub async fn run(&mut self) -> Result<Position, IncrementalError> {
        if self.position.is_finished() {
            return Ok(Position::Finished);
        }
        info!(task_id = %self.task_id, position = %self.position, "Incremental task started");

        let mut idle = false;
        loop {
            if self.cancel.is_cancelled() {
                info!(task_id = %self.task_id, position = %self.position, "Incremental task stopped");
                return Ok(self.position.clone());
            }

            let (batch, end) = self.next_window().await?;

            if batch.is_empty() && end.is_none() {
                if idle {
                    debug!(task_id = %self.task_id, "Change source still idle");
                } else {
                    warn!(
                        task_id = %self.task_id,
                        position = %self.position,
                        idle_ms = self.idle.as_millis() as u64,
                        "Change source idle"
                    );
                    idle = true;
                }
                tokio::select! {
                    _ = tokio::time::sleep(self.idle) => {}
                    _ = self.cancel.cancelled() => {}
                }
                continue;
            }

            idle = false;
            if let Some(last) = batch.last() {
                let last_position = last.position().clone();
                let groups = merger::group(&batch)?;
                self.importer.write(&groups).await?;
                self.position.advance(last_position);
                self.reporter.report(self.position.clone(), batch.len() as u64);
                debug!(
                    task_id = %self.task_id,
                    rows = batch.len(),
                    position = %self.position,
                    "Incremental batch applied"
                );
            }

            if end.is_some() {
                self.position.advance(Position::Finished);
                self.reporter.report(Position::Finished, 0);
                info!(task_id = %self.task_id, "Incremental task reached end of stream");
                return Ok(Position::Finished);
            }
        }
    }

    /// Pulls up to `batch_size` records, stopping early when the source has
    /// nothing more right now or signals end of stream.
    async fn next_window(&mut self) -> Result<(Vec<DataRecord>, Option<Position>), IncrementalError> {
        let mut batch = Vec::with_capacity(self.batch_size);
        while batch.len() < self.batch_size {
            match self.source.poll().await.map_err(IncrementalError::Source)? {
                Some(ChangeEvent::Record(record)) => batch.push(record),
                Some(ChangeEvent::Finished(position)) => return Ok((batch, Some(position))),
                None => break,
            }
        }
        Ok((batch, None))
    }
}
