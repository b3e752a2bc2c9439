use crate::{
    connection::{BoundStatement, Connection},
    error::{ConnectorError, DbError},
    sql::{
        base::row::DbRow,
        postgres::{params::PgParamStore, utils::connect_client},
    },
};
use async_trait::async_trait;
use model::{core::value::Value, records::row::RowData};
use tokio::sync::RwLock;
use tokio_postgres::Client;
use tracing::trace;

pub struct PgConnection {
    client: RwLock<Client>,
}

impl PgConnection {
    pub async fn connect(url: &str) -> Result<Self, ConnectorError> {
        let client = connect_client(url).await?;
        Ok(PgConnection {
            client: RwLock::new(client),
        })
    }
}

#[async_trait]
impl Connection for PgConnection {
    async fn query(
        &self,
        table: &str,
        sql: &str,
        params: &[Value],
    ) -> Result<Vec<RowData>, DbError> {
        trace!(sql, "Postgres query");
        let bindings = PgParamStore::from_values(params);
        let client = self.client.read().await;
        let rows = client.query(sql, &bindings.as_refs()).await?;
        rows.iter()
            .map(|row| DbRow::PostgresRow(row).to_row_data(table))
            .collect()
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, DbError> {
        let bindings = PgParamStore::from_values(params);
        let client = self.client.read().await;
        Ok(client.execute(sql, &bindings.as_refs()).await?)
    }

    async fn execute_batch(&self, statements: &[BoundStatement]) -> Result<u64, DbError> {
        let mut client = self.client.write().await;
        let tx = client.transaction().await?;
        let mut affected = 0;
        for statement in statements {
            let bindings = PgParamStore::from_values(&statement.params);
            affected += tx.execute(statement.sql.as_str(), &bindings.as_refs()).await?;
        }
        tx.commit().await?;
        Ok(affected)
    }
}
