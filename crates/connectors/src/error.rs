use thiserror::Error;

/// All errors coming from the database/query layer.
#[derive(Debug, Error)]
pub enum DbError {
    /// Low-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("MySQL error: {0}")]
    MySql(#[from] mysql_async::Error),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Invalid metadata for `{table}`: {reason}")]
    InvalidMetadata { table: String, reason: String },

    /// A value could not be encoded for, or decoded from, the driver.
    #[error("Cannot convert column `{column}`: {reason}")]
    Conversion { column: String, reason: String },

    #[error("Connector error: {0}")]
    Connector(#[from] ConnectorError),
}

/// Errors happening during connection setup.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("Invalid connection url: {0}")]
    InvalidUrl(String),

    #[error("TLS configuration failed: {0}")]
    TlsConfig(#[from] native_tls::Error),

    #[error("Postgres connection failed: {0}")]
    Connection(#[from] tokio_postgres::Error),

    #[error("MySQL connection failed: {0}")]
    MySql(#[from] mysql_async::Error),

    #[error("Unknown data source: {0}")]
    UnknownDataSource(String),

    #[error("Unsupported database type: {0}")]
    UnsupportedDatabase(String),
}
