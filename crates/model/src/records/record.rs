use crate::{core::value::Value, pipeline::position::Position, records::column::Column};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
    Insert,
    Update,
    Delete,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Insert => "INSERT",
            ChangeType::Update => "UPDATE",
            ChangeType::Delete => "DELETE",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a logical row: table plus unique key values in column order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub table: String,
    pub values: Vec<Value>,
}

/// The unit of change produced by the dump scanner or the change stream.
///
/// Records are immutable once built; an update is expressed through the
/// old/new images of its columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRecord {
    change_type: ChangeType,
    table_name: String,
    position: Position,
    columns: Vec<Column>,
}

impl DataRecord {
    pub fn new(
        change_type: ChangeType,
        table_name: impl Into<String>,
        position: Position,
        columns: Vec<Column>,
    ) -> Self {
        Self {
            change_type,
            table_name: table_name.into(),
            position,
            columns,
        }
    }

    pub fn change_type(&self) -> ChangeType {
        self.change_type
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn unique_key_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.unique_key)
    }

    pub fn has_unique_key(&self) -> bool {
        self.columns.iter().any(|c| c.unique_key)
    }

    /// Key after the change was applied.
    pub fn key(&self) -> RecordKey {
        RecordKey {
            table: self.table_name.clone(),
            values: self.unique_key_columns().map(|c| c.after().clone()).collect(),
        }
    }

    /// Key before the change was applied; this is the row the statement must
    /// target in its `WHERE` clause.
    pub fn old_key(&self) -> RecordKey {
        RecordKey {
            table: self.table_name.clone(),
            values: self
                .unique_key_columns()
                .map(|c| c.before().clone())
                .collect(),
        }
    }

    /// Key identifying the row this record touches for grouping purposes:
    /// deletes are identified by the removed row, everything else by the
    /// resulting row.
    pub fn grouping_key(&self) -> RecordKey {
        match self.change_type {
            ChangeType::Delete => self.old_key(),
            _ => self.key(),
        }
    }

    /// True for an update that moves the row to another unique key.
    pub fn is_key_changed(&self) -> bool {
        self.change_type == ChangeType::Update
            && self
                .unique_key_columns()
                .any(|c| c.old_value.is_some() && c.before() != c.after())
    }

    /// Names of columns whose value changed, in column order.
    pub fn updated_column_names(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.updated)
            .map(|c| c.name.as_str())
            .collect()
    }
}
