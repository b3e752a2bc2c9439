use crate::{
    connection::{BoundStatement, Connection},
    error::{ConnectorError, DbError},
    sql::{base::row::DbRow, mysql::params::MySqlParamStore},
};
use async_trait::async_trait;
use model::{core::value::Value, records::row::RowData};
use mysql_async::{Opts, Pool, Row, TxOpts, prelude::Queryable};
use tracing::trace;

pub struct MySqlConnection {
    pool: Pool,
}

impl MySqlConnection {
    pub async fn connect(url: &str) -> Result<Self, ConnectorError> {
        let opts = Opts::from_url(url).map_err(|e| ConnectorError::InvalidUrl(e.to_string()))?;
        let pool = Pool::new(opts);
        // Fail fast on unreachable servers instead of at the first query.
        drop(pool.get_conn().await?);
        Ok(MySqlConnection { pool })
    }
}

#[async_trait]
impl Connection for MySqlConnection {
    async fn query(
        &self,
        table: &str,
        sql: &str,
        params: &[Value],
    ) -> Result<Vec<RowData>, DbError> {
        trace!(sql, "MySQL query");
        let bindings = MySqlParamStore::from_values(params);
        let mut conn = self.pool.get_conn().await?;
        let rows: Vec<Row> = conn.exec(sql, bindings.params()).await?;
        rows.iter()
            .map(|row| DbRow::MySqlRow(row).to_row_data(table))
            .collect()
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, DbError> {
        let bindings = MySqlParamStore::from_values(params);
        let mut conn = self.pool.get_conn().await?;
        conn.exec_drop(sql, bindings.params()).await?;
        Ok(conn.affected_rows())
    }

    async fn execute_batch(&self, statements: &[BoundStatement]) -> Result<u64, DbError> {
        let mut conn = self.pool.get_conn().await?;
        let mut tx = conn.start_transaction(TxOpts::default()).await?;
        let mut affected = 0;
        for statement in statements {
            let bindings = MySqlParamStore::from_values(&statement.params);
            tx.exec_drop(statement.sql.as_str(), bindings.params()).await?;
            affected += tx.affected_rows();
        }
        tx.commit().await?;
        Ok(affected)
    }
}
