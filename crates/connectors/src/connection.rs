//! Collaborator interfaces to physical databases.

use crate::error::{ConnectorError, DbError};
use async_trait::async_trait;
use model::{core::value::Value, records::row::RowData};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Where a data source lives and how to speak to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSourceConfig {
    pub name: String,
    pub database_type: String,
    pub url: String,
}

/// A SQL text together with the values bound to its placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundStatement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl BoundStatement {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

#[async_trait]
pub trait Connection: Send + Sync {
    /// Runs a query and returns all rows, tagged with `table`.
    async fn query(&self, table: &str, sql: &str, params: &[Value])
    -> Result<Vec<RowData>, DbError>;

    /// Executes one statement and returns the affected row count.
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, DbError>;

    /// Executes the statements in order inside one transaction. Either all of
    /// them are applied or none is.
    async fn execute_batch(&self, statements: &[BoundStatement]) -> Result<u64, DbError>;
}

#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn get_connection(&self, data_source: &str)
    -> Result<Arc<dyn Connection>, ConnectorError>;
}
