//! The shared write path of inventory and incremental tasks.

use crate::{error::ImporterError, retry::classify_db_error};
use connectors::{
    connection::{BoundStatement, Connection},
    metadata::loader::MetadataLoader,
};
use engine_config::importer::ImporterConfiguration;
use engine_core::{
    rate_limit::OperationType,
    retry::RetryPolicy,
};
use futures::{FutureExt, StreamExt, TryStreamExt, future::BoxFuture, stream};
use model::{
    core::value::Value,
    metadata::table::TableMetaData,
    records::{
        grouped::GroupedDataRecord,
        record::{ChangeType, DataRecord},
    },
};
use planner::query::{
    ast::{common::TableRef, insert::OnConflict},
    cache::StatementCache,
    dialect::Dialect,
    statement::Statement,
};
use std::{sync::Arc, time::Instant};
use tracing::{debug, error};

/// Applies merged record groups to the target.
///
/// Each group is flushed as batch deletes, batch inserts, batch updates and
/// finally the non-batch records, one statement at a time in source order.
/// Inserts are upserts so re-applying a chunk after a restart is harmless.
pub struct Importer {
    config: Arc<ImporterConfiguration>,
    connection: Arc<dyn Connection>,
    metadata: Arc<dyn MetadataLoader>,
    statements: StatementCache,
    retry: RetryPolicy,
}

/// Target-side facts about one table, resolved once per group.
struct TableContext {
    name: String,
    table: TableRef,
    metadata: Arc<TableMetaData>,
}

impl Importer {
    pub fn new(
        config: Arc<ImporterConfiguration>,
        connection: Arc<dyn Connection>,
        metadata: Arc<dyn MetadataLoader>,
        dialect: Arc<dyn Dialect>,
    ) -> Self {
        let retry = config.retry_policy();
        Self {
            config,
            connection,
            metadata,
            statements: StatementCache::new(dialect),
            retry,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &ImporterConfiguration {
        &self.config
    }

    /// Writes every group and returns the number of records applied.
    pub async fn write(&self, groups: &[GroupedDataRecord]) -> Result<u64, ImporterError> {
        let mut written = 0;
        for group in groups.iter().filter(|g| !g.is_empty()) {
            written += self.write_group(group).await?;
        }
        Ok(written)
    }

    async fn write_group(&self, group: &GroupedDataRecord) -> Result<u64, ImporterError> {
        let start = Instant::now();
        let ctx = self.table_context(&group.table_name).await?;
        for record in group
            .batch_insert_records
            .iter()
            .chain(&group.batch_update_records)
            .chain(&group.batch_delete_records)
            .chain(&group.non_batch_records)
        {
            check_columns(&ctx, record)?;
        }

        self.write_deletes(&ctx, &group.batch_delete_records).await?;
        self.write_inserts(&ctx, &group.batch_insert_records).await?;
        self.write_updates(&ctx, &group.batch_update_records).await?;
        for record in &group.non_batch_records {
            self.write_single(&ctx, record).await?;
        }

        debug!(
            table = %ctx.name,
            rows = group.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Applied record group"
        );
        Ok(group.len() as u64)
    }

    async fn table_context(&self, table_name: &str) -> Result<TableContext, ImporterError> {
        let metadata =
            self.metadata
                .load(table_name)
                .await
                .map_err(|source| ImporterError::Metadata {
                    table: table_name.to_string(),
                    source,
                })?;
        let table = TableRef {
            schema: self.config.schema_name(table_name).map(str::to_string),
            name: table_name.to_string(),
        };
        Ok(TableContext {
            name: table_name.to_string(),
            table,
            metadata,
        })
    }

    /// Chunks run concurrently: batch records touch distinct keys.
    async fn write_deletes(
        &self,
        ctx: &TableContext,
        records: &[DataRecord],
    ) -> Result<(), ImporterError> {
        let mut chunks = Vec::new();
        for chunk in records.chunks(self.config.batch_size.max(1)) {
            let statements: Vec<(Arc<Statement>, Vec<Value>)> = chunk
                .iter()
                .map(|record| self.delete_statement(ctx, record))
                .collect();
            chunks.push(
                self.execute_chunk(ctx, OperationType::Delete, statements)
                    .boxed(),
            );
        }
        self.run_concurrently(chunks).await
    }

    async fn write_inserts(
        &self,
        ctx: &TableContext,
        records: &[DataRecord],
    ) -> Result<(), ImporterError> {
        let mut chunks = Vec::new();
        for run in same_column_runs(records, self.config.batch_size.max(1)) {
            let statement = self.insert_statement(ctx, run);
            let params: Vec<Value> = run
                .iter()
                .flat_map(|record| record.columns().iter().map(|c| c.after().clone()))
                .collect();
            chunks.push(
                self.execute_chunk(ctx, OperationType::Insert, vec![(statement, params)])
                    .boxed(),
            );
        }
        self.run_concurrently(chunks).await
    }

    /// At most `concurrency` chunks in flight; the first error wins.
    async fn run_concurrently(
        &self,
        chunks: Vec<BoxFuture<'_, Result<(), ImporterError>>>,
    ) -> Result<(), ImporterError> {
        stream::iter(chunks)
            .buffer_unordered(self.config.concurrency.max(1))
            .try_collect::<Vec<_>>()
            .await?;
        Ok(())
    }

    /// Executed strictly in list order: a key-changing update may move a row
    /// onto the key a later update in the same list starts from.
    async fn write_updates(
        &self,
        ctx: &TableContext,
        records: &[DataRecord],
    ) -> Result<(), ImporterError> {
        for chunk in records.chunks(self.config.batch_size.max(1)) {
            let statements: Vec<_> = chunk
                .iter()
                .filter_map(|record| self.update_statement(ctx, record))
                .collect();
            if !statements.is_empty() {
                self.execute_chunk(ctx, OperationType::Update, statements)
                    .await?;
            }
        }
        Ok(())
    }

    async fn write_single(
        &self,
        ctx: &TableContext,
        record: &DataRecord,
    ) -> Result<(), ImporterError> {
        let (operation, statement) = match record.change_type() {
            ChangeType::Insert => {
                let statement = self.insert_statement(ctx, std::slice::from_ref(record));
                let params = record.columns().iter().map(|c| c.after().clone()).collect();
                (OperationType::Insert, (statement, params))
            }
            ChangeType::Update => match self.update_statement(ctx, record) {
                Some(statement) => (OperationType::Update, statement),
                None => return Ok(()),
            },
            ChangeType::Delete => (OperationType::Delete, self.delete_statement(ctx, record)),
        };
        self.execute_chunk(ctx, operation, vec![statement]).await
    }

    fn insert_statement(&self, ctx: &TableContext, rows: &[DataRecord]) -> Arc<Statement> {
        let Some(first) = rows.first() else {
            return self.statements.insert(&ctx.table, &[], 0, None);
        };
        let columns: Vec<String> = first.columns().iter().map(|c| c.name.clone()).collect();
        let key_columns: Vec<String> = first
            .unique_key_columns()
            .map(|c| c.name.clone())
            .collect();
        let update_columns = columns
            .iter()
            .filter(|c| {
                !key_columns.contains(c) && !self.config.is_sharding_column(&ctx.name, c)
            })
            .cloned()
            .collect();
        let on_conflict = (!key_columns.is_empty()).then(|| OnConflict {
            columns: key_columns,
            update_columns,
        });
        self.statements
            .insert(&ctx.table, &columns, rows.len(), on_conflict)
    }

    /// `None` when nothing would be set.
    fn update_statement(
        &self,
        ctx: &TableContext,
        record: &DataRecord,
    ) -> Option<(Arc<Statement>, Vec<Value>)> {
        let updated = record.updated_column_names();
        let set_columns: Vec<&str> = if updated.is_empty() {
            // No change flags from the capture layer: overwrite everything
            // except the key and the router's columns.
            record
                .columns()
                .iter()
                .filter(|c| !c.unique_key && !self.config.is_sharding_column(&ctx.name, &c.name))
                .map(|c| c.name.as_str())
                .collect()
        } else {
            updated
        };
        if set_columns.is_empty() {
            debug!(table = %ctx.name, "Skipping update without changed columns");
            return None;
        }

        let key_columns: Vec<String> = record
            .unique_key_columns()
            .map(|c| c.name.clone())
            .collect();
        let template = self.statements.update(&ctx.table, &key_columns);
        let set_columns: Vec<String> = set_columns.into_iter().map(str::to_string).collect();
        let statement = template.fill(self.statements.dialect(), &set_columns);

        let mut params: Vec<Value> = set_columns
            .iter()
            .filter_map(|name| record.column(name))
            .map(|c| c.after().clone())
            .collect();
        params.extend(record.old_key().values);
        Some((Arc::new(statement), params))
    }

    fn delete_statement(&self, ctx: &TableContext, record: &DataRecord) -> (Arc<Statement>, Vec<Value>) {
        let key_columns: Vec<String> = record
            .unique_key_columns()
            .map(|c| c.name.clone())
            .collect();
        let statement = self.statements.delete(&ctx.table, &key_columns);
        (statement, record.old_key().values)
    }

    /// Runs the statements in one transaction, after the rate limiter and
    /// under the retry policy.
    async fn execute_chunk(
        &self,
        ctx: &TableContext,
        operation: OperationType,
        statements: Vec<(Arc<Statement>, Vec<Value>)>,
    ) -> Result<(), ImporterError> {
        let Some((first, _)) = statements.first() else {
            return Ok(());
        };
        let shape = first.shape();
        if let Some(limiter) = &self.config.rate_limiter {
            limiter.apply(operation, 1).await;
        }

        let bound: Vec<BoundStatement> = statements
            .iter()
            .map(|(statement, params)| BoundStatement::new(statement.sql.clone(), params.clone()))
            .collect();

        self.retry
            .run(|| self.connection.execute_batch(&bound), classify_db_error)
            .await
            .map_err(|err| {
                let source = err.into_inner();
                error!(table = %ctx.name, statement = %shape, error = %source, "Write failed");
                ImporterError::Write {
                    table: ctx.name.clone(),
                    statement: shape,
                    source,
                }
            })?;
        Ok(())
    }
}

/// Every column of `record` must exist on the target.
fn check_columns(ctx: &TableContext, record: &DataRecord) -> Result<(), ImporterError> {
    for column in record.columns() {
        if ctx.metadata.column(&column.name).is_none() {
            return Err(ImporterError::SchemaMismatch {
                table: ctx.name.clone(),
                column: column.name.clone(),
            });
        }
    }
    Ok(())
}

/// Splits `records` into runs of at most `size` records sharing one column
/// list, so each run renders as a single multi-row insert.
fn same_column_runs(records: &[DataRecord], size: usize) -> Vec<&[DataRecord]> {
    let mut runs = Vec::new();
    let mut start = 0;
    for i in 1..=records.len() {
        let boundary = i == records.len()
            || i - start == size
            || !same_columns(&records[start], &records[i]);
        if boundary {
            runs.push(&records[start..i]);
            start = i;
        }
    }
    runs
}

fn same_columns(a: &DataRecord, b: &DataRecord) -> bool {
    a.columns().len() == b.columns().len()
        && a.columns()
            .iter()
            .zip(b.columns())
            .all(|(x, y)| x.name == y.name)
}
