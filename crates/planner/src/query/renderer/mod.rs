//! Defines the core rendering trait and context for converting AST to SQL.

use crate::query::{ast::common::TableRef, dialect::Dialect};

pub mod delete;
pub mod insert;
pub mod select;

/// A trait for any AST node that can be rendered into a SQL string.
pub trait Render {
    fn render<D: Dialect + ?Sized>(&self, renderer: &mut Renderer<'_, D>);
}

/// A context that holds the state during the rendering process.
///
/// It accumulates the SQL string and counts the placeholders emitted so far,
/// and provides access to the dialect for syntax-specific details.
pub struct Renderer<'a, D: Dialect + ?Sized> {
    pub sql: String,
    pub params: usize,
    pub dialect: &'a D,
}

impl<'a, D: Dialect + ?Sized> Renderer<'a, D> {
    pub fn new(dialect: &'a D) -> Self {
        Self {
            sql: String::new(),
            params: 0,
            dialect,
        }
    }

    /// Starts placeholder numbering at `offset`, for fragments that are
    /// appended after other bound parameters.
    pub fn with_offset(dialect: &'a D, offset: usize) -> Self {
        Self {
            sql: String::new(),
            params: offset,
            dialect,
        }
    }

    pub fn finish(self) -> String {
        self.sql
    }

    pub fn add_placeholder(&mut self) {
        let placeholder = self.dialect.get_placeholder(self.params);
        self.params += 1;
        self.sql.push_str(&placeholder);
    }

    pub fn push_ident(&mut self, ident: &str) {
        let quoted = self.dialect.quote_identifier(ident);
        self.sql.push_str(&quoted);
    }

    pub fn render_table_ref(&mut self, table: &TableRef) {
        if let Some(schema) = &table.schema {
            self.push_ident(schema);
            self.sql.push('.');
        }
        self.push_ident(&table.name);
    }

    /// Renders `a = ?, b = ?` (with `separator` between the pairs).
    pub fn render_assignments(&mut self, columns: &[String], separator: &str) {
        for (i, column) in columns.iter().enumerate() {
            if i > 0 {
                self.sql.push_str(separator);
            }
            self.push_ident(column);
            self.sql.push_str(" = ");
            self.add_placeholder();
        }
    }
}
