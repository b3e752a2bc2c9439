use crate::{error::InventoryError, importer::Importer};
use connectors::{connection::Connection, metadata::loader::MetadataLoader};
use engine_core::{
    progress::ProgressReporter,
    rate_limit::{OperationType, RateLimitAlgorithm},
};
use model::{
    core::value::Value,
    metadata::table::{ColumnMetaData, TableMetaData},
    pipeline::position::{KeyBound, Position},
    records::{
        column::Column,
        grouped::GroupedDataRecord,
        record::{ChangeType, DataRecord},
        row::RowData,
    },
};
use planner::query::{ast::common::TableRef, cache::StatementCache, dialect::LowerBound};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// What one inventory task copies.
#[derive(Debug, Clone)]
pub struct InventoryTaskConfig {
    pub task_id: String,
    pub logic_table: String,
    pub actual_table: String,
    pub schema: Option<String>,
    /// Overrides the unique key found in metadata.
    pub unique_key: Option<String>,
    pub batch_size: usize,
}

/// Full-snapshot copy of one source table using keyset pagination.
///
/// Each page is written through the importer before the position moves
/// past it. A restart resumes from the last reported position, re-reading
/// at most the boundary row.
pub struct InventoryTask {
    config: InventoryTaskConfig,
    position: Position,
    source: Arc<dyn Connection>,
    metadata: Arc<dyn MetadataLoader>,
    statements: Arc<StatementCache>,
    importer: Arc<Importer>,
    rate_limiter: Option<Arc<dyn RateLimitAlgorithm>>,
    reporter: ProgressReporter,
    cancel: CancellationToken,
}

impl InventoryTask {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: InventoryTaskConfig,
        position: Position,
        source: Arc<dyn Connection>,
        metadata: Arc<dyn MetadataLoader>,
        statements: Arc<StatementCache>,
        importer: Arc<Importer>,
        reporter: ProgressReporter,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            position,
            source,
            metadata,
            statements,
            importer,
            rate_limiter: None,
            reporter,
            cancel,
        }
    }

    pub fn with_rate_limiter(mut self, limiter: Option<Arc<dyn RateLimitAlgorithm>>) -> Self {
        self.rate_limiter = limiter;
        self
    }

    pub fn task_id(&self) -> &str {
        &self.config.task_id
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    /// Requests a cooperative stop; observed between pages.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Copies until the table is exhausted or a stop is requested, and
    /// returns the position reached.
    pub async fn run(&mut self) -> Result<Position, InventoryError> {
        if self.position.is_finished() {
            debug!(task_id = %self.config.task_id, "Inventory task already finished");
            return Ok(Position::Finished);
        }

        let table = self.config.actual_table.clone();
        let metadata = self
            .metadata
            .load(&table)
            .await
            .map_err(|source| InventoryError::Metadata {
                table: table.clone(),
                source,
            })?;

        let key = self.scan_key(&metadata)?;
        info!(
            task_id = %self.config.task_id,
            table = %table,
            position = %self.position,
            "Inventory task started"
        );

        self.dump_page_by_page(&metadata, key).await?;

        if self.position.is_finished() {
            info!(task_id = %self.config.task_id, table = %table, "Inventory task finished");
        } else {
            info!(task_id = %self.config.task_id, position = %self.position, "Inventory task stopped");
        }
        Ok(self.position.clone())
    }

    /// Resolves the paging column before any row is read. A table without
    /// one cannot be resumed from a position and is rejected.
    fn scan_key<'m>(
        &self,
        metadata: &'m TableMetaData,
    ) -> Result<&'m ColumnMetaData, InventoryError> {
        let column = match &self.config.unique_key {
            Some(name) => Some(metadata.column(name).ok_or_else(|| {
                InventoryError::SchemaMismatch {
                    table: self.config.actual_table.clone(),
                    column: name.clone(),
                }
            })?),
            None => metadata.unique_key_columns().first().copied(),
        };

        let Some(column) = column else {
            return Err(InventoryError::MissingUniqueKey {
                table: self.config.actual_table.clone(),
            });
        };
        if !column.data_type.is_integer() && !column.data_type.is_string() {
            return Err(InventoryError::UnsupportedKeyType {
                table: self.config.actual_table.clone(),
                column: column.name.clone(),
                data_type: format!("{:?}", column.data_type),
            });
        }
        Ok(column)
    }

    fn table_ref(&self) -> TableRef {
        TableRef {
            schema: self.config.schema.clone(),
            name: self.config.actual_table.clone(),
        }
    }

    async fn dump_page_by_page(
        &mut self,
        metadata: &TableMetaData,
        key: &ColumnMetaData,
    ) -> Result<(), InventoryError> {
        let table = self.table_ref();
        let batch_size = self.config.batch_size.max(1);
        let end = self.position.end().cloned();
        let mut begin = self.position.begin().cloned();
        let mut first_query = true;

        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            let lower = match (&begin, first_query) {
                (None, _) => None,
                (Some(_), true) => Some(LowerBound::Inclusive),
                (Some(_), false) => Some(LowerBound::Exclusive),
            };
            let statement =
                self.statements
                    .chunked_query(&table, &key.name, lower, end.is_some(), batch_size);
            let params: Vec<Value> = begin
                .iter()
                .chain(end.iter())
                .map(KeyBound::to_value)
                .collect();
            let mut rows = self.read(&statement.sql, &params).await?;
            first_query = false;
            let full_page = rows.len() >= batch_size;

            if rows.len() > 1 {
                let first = rows.first().map(|r| r.get_value(&key.name));
                let last = rows.last().map(|r| r.get_value(&key.name));
                if first == last {
                    // The whole page shares one key value; read all its rows
                    // at once so the scan can move past it.
                    let point = self.statements.point_query(&table, &key.name);
                    let value = first.unwrap_or(Value::Null);
                    rows = self.read(&point.sql, std::slice::from_ref(&value)).await?;
                }
            }

            let Some(last_row) = rows.last() else {
                self.advance(Position::Finished, 0);
                return Ok(());
            };
            let last_key = self.key_bound(last_row, &key.name)?;
            let records = self.to_records(
                metadata,
                &rows,
                &Position::range(Some(last_key.clone()), end.clone()),
            )?;
            self.import(records).await?;

            let next = if full_page {
                Position::range(Some(last_key.clone()), end.clone())
            } else {
                Position::Finished
            };
            self.advance(next, rows.len() as u64);
            if self.position.is_finished() {
                return Ok(());
            }
            begin = Some(last_key);
        }
    }

    async fn read(&self, sql: &str, params: &[Value]) -> Result<Vec<RowData>, InventoryError> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.apply(OperationType::Select, 1).await;
        }
        self.source
            .query(&self.config.actual_table, sql, params)
            .await
            .map_err(|source| InventoryError::Read {
                table: self.config.actual_table.clone(),
                source,
            })
    }

    fn key_bound(&self, row: &RowData, column: &str) -> Result<KeyBound, InventoryError> {
        KeyBound::from_value(&row.get_value(column)).ok_or_else(|| {
            InventoryError::InvalidKeyValue {
                table: self.config.actual_table.clone(),
                column: column.to_string(),
            }
        })
    }

    /// Dumped rows are replayed as inserts on the logical table.
    fn to_records(
        &self,
        metadata: &TableMetaData,
        rows: &[RowData],
        position: &Position,
    ) -> Result<Vec<DataRecord>, InventoryError> {
        rows.iter()
            .map(|row| {
                let columns = row
                    .field_values
                    .iter()
                    .map(|field| {
                        let meta = metadata.column(&field.name).ok_or_else(|| {
                            InventoryError::SchemaMismatch {
                                table: self.config.actual_table.clone(),
                                column: field.name.clone(),
                            }
                        })?;
                        Ok(Column::new(
                            meta.name.clone(),
                            field.value.clone(),
                            true,
                            metadata.is_unique_key(&meta.name),
                        ))
                    })
                    .collect::<Result<Vec<_>, InventoryError>>()?;
                Ok(DataRecord::new(
                    ChangeType::Insert,
                    self.config.logic_table.clone(),
                    position.clone(),
                    columns,
                ))
            })
            .collect()
    }

    async fn import(&self, records: Vec<DataRecord>) -> Result<(), InventoryError> {
        let mut group = GroupedDataRecord::new(self.config.logic_table.clone());
        group.batch_insert_records = records;
        self.importer.write(std::slice::from_ref(&group)).await?;
        Ok(())
    }

    fn advance(&mut self, next: Position, records: u64) {
        self.position.advance(next);
        debug!(
            task_id = %self.config.task_id,
            position = %self.position,
            rows = records,
            "Inventory page applied"
        );
        self.reporter.report(self.position.clone(), records);
    }
}
