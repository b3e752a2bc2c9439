use connectors::error::{ConnectorError, DbError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MergeError {
    #[error("Record on table '{table}' carries no unique key column")]
    MissingUniqueKey { table: String },
}

#[derive(Error, Debug)]
pub enum ImporterError {
    /// `statement` is the shape of the failed statement, never its values.
    #[error("Failed to write to table '{table}' with {statement}: {source}")]
    Write {
        table: String,
        statement: String,
        #[source]
        source: DbError,
    },

    #[error("Column '{column}' of table '{table}' does not exist on the target")]
    SchemaMismatch { table: String, column: String },

    #[error("Failed to load target metadata of table '{table}': {source}")]
    Metadata {
        table: String,
        #[source]
        source: DbError,
    },

    #[error("Target connection failed: {0}")]
    Connector(#[from] ConnectorError),
}

#[derive(Error, Debug)]
pub enum InventoryError {
    #[error("Unique key column '{column}' of table '{table}' has unsupported type {data_type}")]
    UnsupportedKeyType {
        table: String,
        column: String,
        data_type: String,
    },

    #[error("Table '{table}' has no column '{column}'")]
    SchemaMismatch { table: String, column: String },

    #[error("Table '{table}' has no unique key to page by")]
    MissingUniqueKey { table: String },

    #[error("Row of table '{table}' has no usable value for key column '{column}'")]
    InvalidKeyValue { table: String, column: String },

    #[error("Failed to load source metadata of table '{table}': {source}")]
    Metadata {
        table: String,
        #[source]
        source: DbError,
    },

    #[error("Failed to read table '{table}': {source}")]
    Read {
        table: String,
        #[source]
        source: DbError,
    },

    #[error(transparent)]
    Import(#[from] ImporterError),
}

#[derive(Error, Debug)]
pub enum IncrementalError {
    #[error("Change event source failed: {0}")]
    Source(#[source] DbError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Import(#[from] ImporterError),
}

#[derive(Error, Debug)]
pub enum CheckError {
    #[error("Table '{table}' has no orderable unique key to check by")]
    MissingUniqueKey { table: String },

    #[error("Failed to read table '{table}': {source}")]
    Read {
        table: String,
        #[source]
        source: DbError,
    },

    #[error("Failed to load metadata of table '{table}': {source}")]
    Metadata {
        table: String,
        #[source]
        source: DbError,
    },

    #[error("Connection failed: {0}")]
    Connector(#[from] ConnectorError),
}
