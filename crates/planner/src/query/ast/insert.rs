//! Defines the AST for a multi-row INSERT statement.

use crate::query::ast::common::TableRef;

/// An INSERT of `rows` placeholder rows over `columns`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Insert {
    pub table: TableRef,
    pub columns: Vec<String>,
    pub rows: usize,
    /// Turns the insert into an upsert keyed on the unique key.
    pub on_conflict: Option<OnConflict>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OnConflict {
    /// Unique key columns the conflict is detected on.
    pub columns: Vec<String>,
    /// Columns overwritten with the incoming row. Empty means keep the
    /// existing row.
    pub update_columns: Vec<String>,
}
