//! Source/target comparison behind `CHECK SCALING`.

use crate::error::CheckError;
use connectors::{connection::Connection, metadata::loader::MetadataLoader};
use engine_config::check::CheckAlgorithm;
use model::{
    core::value::Value,
    job::report::TableCheckResult,
    pipeline::position::KeyBound,
    records::row::RowData,
};
use planner::query::{ast::common::TableRef, cache::StatementCache, dialect::LowerBound};
use std::sync::Arc;
use tracing::{debug, info};

/// One physical table taking part in a check.
#[derive(Clone)]
pub struct CheckEndpoint {
    pub connection: Arc<dyn Connection>,
    pub metadata: Arc<dyn MetadataLoader>,
    pub statements: Arc<StatementCache>,
    pub table: TableRef,
}

/// Row count plus an order-independent digest of the rows read.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct TableSummary {
    count: u64,
    digest: u128,
}

impl TableSummary {
    fn merge(self, other: TableSummary) -> TableSummary {
        TableSummary {
            count: self.count + other.count,
            digest: self.digest.wrapping_add(other.digest),
        }
    }
}

pub struct ConsistencyChecker {
    algorithm: CheckAlgorithm,
    batch_size: usize,
}

impl ConsistencyChecker {
    pub fn new(algorithm: CheckAlgorithm, batch_size: usize) -> Self {
        Self {
            algorithm,
            batch_size: batch_size.max(1),
        }
    }

    pub fn algorithm(&self) -> CheckAlgorithm {
        self.algorithm
    }

    /// Compares the union of `sources` (the shards of one logical table)
    /// against `target`.
    pub async fn check(
        &self,
        logic_table: &str,
        sources: &[CheckEndpoint],
        target: &CheckEndpoint,
    ) -> Result<TableCheckResult, CheckError> {
        let mut source = TableSummary::default();
        for endpoint in sources {
            source = source.merge(self.summarize(endpoint).await?);
        }
        let target = self.summarize(target).await?;

        let records_count_matched = source.count == target.count;
        let records_content_matched = match self.algorithm {
            CheckAlgorithm::Count => records_count_matched,
            CheckAlgorithm::DataMatch => records_count_matched && source.digest == target.digest,
        };

        info!(
            table = %logic_table,
            algorithm = %self.algorithm,
            source_records = source.count,
            target_records = target.count,
            matched = records_content_matched,
            "Checked table"
        );
        Ok(TableCheckResult {
            table_name: logic_table.to_string(),
            source_records_count: source.count,
            target_records_count: target.count,
            records_count_matched,
            records_content_matched,
        })
    }

    async fn summarize(&self, endpoint: &CheckEndpoint) -> Result<TableSummary, CheckError> {
        match self.algorithm {
            CheckAlgorithm::Count => self.count(endpoint).await,
            CheckAlgorithm::DataMatch => self.digest(endpoint).await,
        }
    }

    async fn count(&self, endpoint: &CheckEndpoint) -> Result<TableSummary, CheckError> {
        let statement = endpoint.statements.count_query(&endpoint.table);
        let rows = read(endpoint, &statement.sql, &[]).await?;
        let count = rows
            .first()
            .and_then(RowData::first_value)
            .and_then(Value::as_i64)
            .unwrap_or(0)
            .max(0) as u64;
        Ok(TableSummary { count, digest: 0 })
    }

    /// Reads the table in key-ordered chunks, hashing every row. Tables
    /// without an orderable unique key are rejected before any read.
    async fn digest(&self, endpoint: &CheckEndpoint) -> Result<TableSummary, CheckError> {
        let name = &endpoint.table.name;
        let metadata = endpoint
            .metadata
            .load(name)
            .await
            .map_err(|source| CheckError::Metadata {
                table: name.clone(),
                source,
            })?;
        let key = metadata
            .unique_key_columns()
            .first()
            .filter(|c| c.data_type.is_integer() || c.data_type.is_string())
            .map(|c| c.name.clone())
            .ok_or_else(|| CheckError::MissingUniqueKey {
                table: name.clone(),
            })?;

        let mut summary = TableSummary::default();
        let mut begin: Option<KeyBound> = None;
        loop {
            let lower = begin.as_ref().map(|_| LowerBound::Exclusive);
            let statement = endpoint.statements.chunked_query(
                &endpoint.table,
                &key,
                lower,
                false,
                self.batch_size,
            );
            let params: Vec<Value> = begin.iter().map(KeyBound::to_value).collect();
            let rows = read(endpoint, &statement.sql, &params).await?;
            for row in &rows {
                summary = summary.merge(row_summary(row));
            }
            debug!(table = %name, rows = rows.len(), "Digested chunk");

            if rows.len() < self.batch_size {
                return Ok(summary);
            }
            begin = rows
                .last()
                .and_then(|row| KeyBound::from_value(&row.get_value(&key)));
            if begin.is_none() {
                return Ok(summary);
            }
        }
    }
}

async fn read(
    endpoint: &CheckEndpoint,
    sql: &str,
    params: &[Value],
) -> Result<Vec<RowData>, CheckError> {
    endpoint
        .connection
        .query(&endpoint.table.name, sql, params)
        .await
        .map_err(|source| CheckError::Read {
            table: endpoint.table.name.clone(),
            source,
        })
}

/// Fields are hashed sorted by lower-cased name so column order does not
/// matter.
fn row_summary(row: &RowData) -> TableSummary {
    let mut fields: Vec<_> = row
        .field_values
        .iter()
        .map(|f| (f.name.to_ascii_lowercase(), &f.value))
        .collect();
    fields.sort_by(|a, b| a.0.cmp(&b.0));

    let mut bytes = Vec::new();
    for (name, value) in fields {
        bytes.extend_from_slice(name.as_bytes());
        bytes.push(0);
        value.canonical_bytes(&mut bytes);
    }
    let hash = blake3::hash(&bytes);
    let mut head = [0u8; 16];
    head.copy_from_slice(&hash.as_bytes()[..16]);
    TableSummary {
        count: 1,
        digest: u128::from_be_bytes(head),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::records::row::FieldValue;

    fn row(fields: &[(&str, Value)]) -> RowData {
        RowData::new(
            "t_order",
            fields
                .iter()
                .map(|(name, value)| FieldValue {
                    name: name.to_string(),
                    value: value.clone(),
                })
                .collect(),
        )
    }

    #[test]
    fn row_digest_ignores_column_order_and_case() {
        let a = row(&[("order_id", Value::Int(1)), ("status", Value::from("PAID"))]);
        let b = row(&[("STATUS", Value::from("PAID")), ("order_id", Value::Int(1))]);
        assert_eq!(row_summary(&a), row_summary(&b));

        let c = row(&[("order_id", Value::Int(1)), ("status", Value::from("NEW"))]);
        assert_ne!(row_summary(&a), row_summary(&c));
    }

    #[test]
    fn summaries_combine_regardless_of_shard_order() {
        let rows: Vec<_> = (0..4)
            .map(|i| row_summary(&row(&[("id", Value::Int(i))])))
            .collect();
        let forward = rows.iter().fold(TableSummary::default(), |acc, r| acc.merge(*r));
        let backward = rows
            .iter()
            .rev()
            .fold(TableSummary::default(), |acc, r| acc.merge(*r));
        assert_eq!(forward, backward);
        assert_eq!(forward.count, 4);
    }
}
