//! Connection factory resolving data sources by name.

use crate::{
    connection::{Connection, ConnectionFactory, DataSourceConfig},
    error::ConnectorError,
    sql::{mysql::connection::MySqlConnection, postgres::connection::PgConnection},
};
use async_trait::async_trait;
use planner::query::registry::dialect_for;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;
use tracing::info;

/// Opens one connection per configured data source and reuses it.
pub struct DefaultConnectionFactory {
    data_sources: HashMap<String, DataSourceConfig>,
    connections: Mutex<HashMap<String, Arc<dyn Connection>>>,
}

impl DefaultConnectionFactory {
    pub fn new(data_sources: impl IntoIterator<Item = DataSourceConfig>) -> Self {
        Self {
            data_sources: data_sources
                .into_iter()
                .map(|ds| (ds.name.clone(), ds))
                .collect(),
            connections: Mutex::new(HashMap::new()),
        }
    }

    async fn open(config: &DataSourceConfig) -> Result<Arc<dyn Connection>, ConnectorError> {
        let dialect = dialect_for(&config.database_type)
            .map_err(|_| ConnectorError::UnsupportedDatabase(config.database_type.clone()))?;
        let connection: Arc<dyn Connection> = match dialect.name() {
            "MySQL" => Arc::new(MySqlConnection::connect(&config.url).await?),
            _ => Arc::new(PgConnection::connect(&config.url).await?),
        };
        info!(data_source = %config.name, dialect = dialect.name(), "Connected");
        Ok(connection)
    }
}

#[async_trait]
impl ConnectionFactory for DefaultConnectionFactory {
    async fn get_connection(
        &self,
        data_source: &str,
    ) -> Result<Arc<dyn Connection>, ConnectorError> {
        let mut connections = self.connections.lock().await;
        if let Some(connection) = connections.get(data_source) {
            return Ok(Arc::clone(connection));
        }

        let config = self
            .data_sources
            .get(data_source)
            .ok_or_else(|| ConnectorError::UnknownDataSource(data_source.to_string()))?;
        let connection = Self::open(config).await?;
        connections.insert(data_source.to_string(), Arc::clone(&connection));
        Ok(connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_unknown_data_source() {
        let factory = DefaultConnectionFactory::new(vec![]);
        assert!(matches!(
            factory.get_connection("ds_9").await,
            Err(ConnectorError::UnknownDataSource(name)) if name == "ds_9"
        ));
    }

    #[tokio::test]
    async fn rejects_unsupported_database_type() {
        let factory = DefaultConnectionFactory::new(vec![DataSourceConfig {
            name: "ds_0".into(),
            database_type: "oracle".into(),
            url: "oracle://localhost".into(),
        }]);
        assert!(matches!(
            factory.get_connection("ds_0").await,
            Err(ConnectorError::UnsupportedDatabase(_))
        ));
    }
}
