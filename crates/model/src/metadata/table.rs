use crate::core::data_type::DataType;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMetaData {
    /// 1-based position in the table definition.
    pub ordinal: usize,
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub primary_key: bool,
    pub unique_key: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueIndex {
    pub name: String,
    pub columns: Vec<String>,
}

/// Shape of a table, loaded once per job and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMetaData {
    pub table_name: String,
    /// Columns in ordinal order.
    pub columns: Vec<ColumnMetaData>,
    pub unique_indexes: Vec<UniqueIndex>,
}

impl TableMetaData {
    pub fn new(
        table_name: impl Into<String>,
        mut columns: Vec<ColumnMetaData>,
        unique_indexes: Vec<UniqueIndex>,
    ) -> Self {
        columns.sort_by_key(|c| c.ordinal);
        Self {
            table_name: table_name.into(),
            columns,
            unique_indexes,
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnMetaData> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn primary_key_columns(&self) -> Vec<&ColumnMetaData> {
        self.columns.iter().filter(|c| c.primary_key).collect()
    }

    /// Columns identifying a row: the primary key, or the first unique index
    /// whose columns are all present when the table has none.
    pub fn unique_key_columns(&self) -> Vec<&ColumnMetaData> {
        let pk = self.primary_key_columns();
        if !pk.is_empty() {
            return pk;
        }
        self.unique_indexes
            .iter()
            .map(|idx| {
                idx.columns
                    .iter()
                    .filter_map(|name| self.column(name))
                    .collect::<Vec<_>>()
            })
            .find(|cols| !cols.is_empty())
            .unwrap_or_default()
    }

    pub fn is_unique_key(&self, column: &str) -> bool {
        self.unique_key_columns()
            .iter()
            .any(|c| c.name.eq_ignore_ascii_case(column))
    }
}
