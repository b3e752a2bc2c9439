//! Rendered statements and the update template.

use crate::query::{ast::common::TableRef, dialect::Dialect, renderer::Renderer};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Insert,
    Update,
    Delete,
    Select,
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatementKind::Insert => "INSERT",
            StatementKind::Update => "UPDATE",
            StatementKind::Delete => "DELETE",
            StatementKind::Select => "SELECT",
        };
        f.write_str(s)
    }
}

/// A parametrized SQL statement ready to be bound and executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub kind: StatementKind,
    pub table: String,
    /// Columns bound by the statement, in parameter order.
    pub columns: Vec<String>,
    pub sql: String,
}

impl Statement {
    /// Operation, table and column list. Safe to log: carries no values.
    pub fn shape(&self) -> String {
        format!("{} {}({})", self.kind, self.table, self.columns.join(", "))
    }
}

/// `UPDATE <table> SET %s WHERE <unique key>`.
///
/// The set list differs from batch to batch, so the template is cached per
/// table and filled with the updated columns of each record. Parameters are
/// bound as the set values followed by the before-image key values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateTemplate {
    table: TableRef,
    key_columns: Vec<String>,
    template: String,
}

impl UpdateTemplate {
    pub(crate) fn new(table: TableRef, key_columns: Vec<String>, template: String) -> Self {
        Self {
            table,
            key_columns,
            template,
        }
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn key_columns(&self) -> &[String] {
        &self.key_columns
    }

    pub fn fill<D: Dialect + ?Sized>(&self, dialect: &D, set_columns: &[String]) -> Statement {
        let mut set = Renderer::new(dialect);
        set.render_assignments(set_columns, ", ");
        let mut predicate = Renderer::with_offset(dialect, set.params);
        predicate.render_assignments(&self.key_columns, " AND ");

        let sql = self
            .template
            .replacen("%s", &set.finish(), 1)
            .replacen("%w", &predicate.finish(), 1);

        let mut columns = set_columns.to_vec();
        columns.extend(self.key_columns.iter().cloned());
        Statement {
            kind: StatementKind::Update,
            table: self.table.to_string(),
            columns,
            sql,
        }
    }
}
