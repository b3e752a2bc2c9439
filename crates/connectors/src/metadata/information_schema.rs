//! `information_schema` backed metadata loader for PostgreSQL and MySQL.

use crate::{connection::Connection, error::DbError, metadata::loader::MetadataLoader};
use async_trait::async_trait;
use model::{
    core::{data_type::DataType, value::Value},
    metadata::table::{ColumnMetaData, TableMetaData, UniqueIndex},
    records::row::RowData,
};
use std::sync::Arc;

const PG_COLUMNS_SQL: &str = include_str!("sql/pg_columns.sql");
const PG_UNIQUE_KEYS_SQL: &str = include_str!("sql/pg_unique_keys.sql");
const MYSQL_COLUMNS_SQL: &str = include_str!("sql/mysql_columns.sql");
const MYSQL_UNIQUE_KEYS_SQL: &str = include_str!("sql/mysql_unique_keys.sql");

const PRIMARY_KEY: &str = "PRIMARY KEY";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogFlavor {
    Postgres,
    MySql,
}

impl CatalogFlavor {
    /// Picks the catalog queries matching a dialect name.
    pub fn for_dialect(name: &str) -> Self {
        if name.eq_ignore_ascii_case("MySQL") {
            CatalogFlavor::MySql
        } else {
            CatalogFlavor::Postgres
        }
    }

    fn queries(&self) -> (&'static str, &'static str) {
        match self {
            CatalogFlavor::Postgres => (PG_COLUMNS_SQL, PG_UNIQUE_KEYS_SQL),
            CatalogFlavor::MySql => (MYSQL_COLUMNS_SQL, MYSQL_UNIQUE_KEYS_SQL),
        }
    }
}

pub struct InformationSchemaLoader {
    connection: Arc<dyn Connection>,
    flavor: CatalogFlavor,
    /// Defaults to the connection's current schema/database.
    schema: Option<String>,
}

impl InformationSchemaLoader {
    pub fn new(connection: Arc<dyn Connection>, flavor: CatalogFlavor, schema: Option<String>) -> Self {
        Self {
            connection,
            flavor,
            schema,
        }
    }

    fn params(&self, table: &str) -> Vec<Value> {
        let schema = self
            .schema
            .as_ref()
            .map(|s| Value::String(s.clone()))
            .unwrap_or(Value::Null);
        vec![schema, Value::String(table.to_string())]
    }
}

#[async_trait]
impl MetadataLoader for InformationSchemaLoader {
    async fn load(&self, table: &str) -> Result<Arc<TableMetaData>, DbError> {
        let (columns_sql, keys_sql) = self.flavor.queries();
        let params = self.params(table);

        let column_rows = self.connection.query(table, columns_sql, &params).await?;
        if column_rows.is_empty() {
            return Err(DbError::TableNotFound(table.to_string()));
        }
        let key_rows = self.connection.query(table, keys_sql, &params).await?;

        build_table_metadata(table, &column_rows, &key_rows).map(Arc::new)
    }
}

/// Assembles metadata from the catalog rows returned by the column and
/// unique-key queries.
pub fn build_table_metadata(
    table: &str,
    column_rows: &[RowData],
    key_rows: &[RowData],
) -> Result<TableMetaData, DbError> {
    let mut primary_key: Vec<String> = Vec::new();
    let mut unique_indexes: Vec<UniqueIndex> = Vec::new();

    for row in key_rows {
        let index_name = text(table, row, "index_name")?;
        let constraint_type = text(table, row, "constraint_type")?;
        let column_name = text(table, row, "column_name")?;

        if constraint_type.eq_ignore_ascii_case(PRIMARY_KEY) {
            primary_key.push(column_name);
            continue;
        }
        match unique_indexes.iter_mut().find(|idx| idx.name == index_name) {
            Some(index) => index.columns.push(column_name),
            None => unique_indexes.push(UniqueIndex {
                name: index_name,
                columns: vec![column_name],
            }),
        }
    }

    let columns = column_rows
        .iter()
        .map(|row| {
            let name = text(table, row, "column_name")?;
            let data_type = DataType::from_sql_name(&text(table, row, "data_type")?);
            let nullable = text(table, row, "is_nullable")?.eq_ignore_ascii_case("YES");
            let ordinal = row
                .get("ordinal_position")
                .and_then(|f| f.value.as_i64())
                .and_then(|v| usize::try_from(v).ok())
                .ok_or_else(|| invalid(table, "ordinal_position is missing"))?;
            let is_pk = primary_key.iter().any(|c| c.eq_ignore_ascii_case(&name));
            let is_unique = is_pk
                || unique_indexes
                    .iter()
                    .any(|idx| idx.columns.iter().any(|c| c.eq_ignore_ascii_case(&name)));
            Ok(ColumnMetaData {
                ordinal,
                name,
                data_type,
                nullable,
                primary_key: is_pk,
                unique_key: is_unique,
            })
        })
        .collect::<Result<Vec<_>, DbError>>()?;

    Ok(TableMetaData::new(table, columns, unique_indexes))
}

fn text(table: &str, row: &RowData, field: &str) -> Result<String, DbError> {
    row.get(field)
        .and_then(|f| f.value.as_string())
        .ok_or_else(|| invalid(table, &format!("{field} is missing")))
}

fn invalid(table: &str, reason: &str) -> DbError {
    DbError::InvalidMetadata {
        table: table.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::records::row::FieldValue;

    fn row(fields: &[(&str, Value)]) -> RowData {
        RowData::new(
            "catalog",
            fields
                .iter()
                .map(|(name, value)| FieldValue {
                    name: name.to_string(),
                    value: value.clone(),
                })
                .collect(),
        )
    }

    fn column(name: &str, data_type: &str, nullable: &str, ordinal: i64) -> RowData {
        row(&[
            ("column_name", Value::from(name)),
            ("data_type", Value::from(data_type)),
            ("is_nullable", Value::from(nullable)),
            ("ordinal_position", Value::Int(ordinal)),
        ])
    }

    fn key(index: &str, kind: &str, column: &str) -> RowData {
        row(&[
            ("index_name", Value::from(index)),
            ("constraint_type", Value::from(kind)),
            ("column_name", Value::from(column)),
        ])
    }

    #[test]
    fn builds_primary_and_unique_keys() {
        let columns = vec![
            column("order_id", "bigint(20) unsigned", "NO", 1),
            column("user_id", "int", "NO", 2),
            column("status", "varchar(32)", "YES", 3),
        ];
        let keys = vec![
            key("PRIMARY", "PRIMARY KEY", "order_id"),
            key("uk_user_status", "UNIQUE", "user_id"),
            key("uk_user_status", "UNIQUE", "status"),
        ];

        let meta = build_table_metadata("t_order", &columns, &keys).unwrap();
        assert_eq!(meta.column_names(), vec!["order_id", "user_id", "status"]);
        let order_id = meta.column("order_id").unwrap();
        assert!(order_id.primary_key);
        assert_eq!(order_id.data_type, DataType::UnsignedBigInt);
        assert!(meta.column("status").unwrap().nullable);
        assert!(meta.column("user_id").unwrap().unique_key);
        assert_eq!(meta.unique_indexes.len(), 1);
        assert_eq!(meta.unique_indexes[0].columns, vec!["user_id", "status"]);
    }

    #[test]
    fn rejects_rows_without_ordinal() {
        let columns = vec![row(&[
            ("column_name", Value::from("id")),
            ("data_type", Value::from("int4")),
            ("is_nullable", Value::from("NO")),
        ])];
        assert!(matches!(
            build_table_metadata("t", &columns, &[]),
            Err(DbError::InvalidMetadata { .. })
        ));
    }
}
