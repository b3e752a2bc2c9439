//! Defines the `Dialect` trait for database-specific SQL syntax.
//!
//! A dialect is a plain value; everything the pipeline issues is built
//! through the provided `build_*` methods, which only defer to the dialect
//! for quoting, placeholders and upsert syntax.

use crate::query::{
    ast::{
        common::TableRef,
        delete::Delete,
        insert::{Insert, OnConflict},
        select::{CmpOp, Predicate, Projection, Select},
    },
    renderer::{Render, Renderer},
    statement::{Statement, StatementKind, UpdateTemplate},
};
use std::fmt::Debug;

/// Lower bound of a keyset chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LowerBound {
    /// `key >= ?`, the first chunk of a range.
    Inclusive,
    /// `key > ?`, every chunk after the first.
    Exclusive,
}

pub trait Dialect: Send + Sync + Debug {
    /// Returns the name of the dialect (e.g., "PostgreSQL", "MySQL").
    fn name(&self) -> &'static str;

    /// Wraps an identifier (like a table or column name) in the correct
    /// quotation marks for the dialect.
    ///
    /// - PostgreSQL uses double quotes: `"my_column"`
    /// - MySQL uses backticks: `` `my_column` ``
    fn quote_identifier(&self, ident: &str) -> String;

    /// Returns the placeholder for a parameterized query.
    ///
    /// - PostgreSQL uses `$1`, `$2`, etc.
    /// - MySQL uses `?`
    fn get_placeholder(&self, index: usize) -> String;

    /// Conflict clause appended to an insert so that re-applying a row is
    /// idempotent.
    fn upsert_clause(&self, on_conflict: &OnConflict) -> String;

    fn build_insert(
        &self,
        table: &TableRef,
        columns: &[String],
        rows: usize,
        on_conflict: Option<OnConflict>,
    ) -> Statement {
        let insert = Insert {
            table: table.clone(),
            columns: columns.to_vec(),
            rows,
            on_conflict,
        };
        let mut renderer = Renderer::new(self);
        insert.render(&mut renderer);
        Statement {
            kind: StatementKind::Insert,
            table: table.to_string(),
            columns: columns.to_vec(),
            sql: renderer.finish(),
        }
    }

    fn build_update(&self, table: &TableRef, key_columns: &[String]) -> UpdateTemplate {
        let mut renderer = Renderer::new(self);
        renderer.sql.push_str("UPDATE ");
        renderer.render_table_ref(table);
        renderer.sql.push_str(" SET %s WHERE %w");
        UpdateTemplate::new(table.clone(), key_columns.to_vec(), renderer.finish())
    }

    fn build_delete(&self, table: &TableRef, key_columns: &[String]) -> Statement {
        let delete = Delete {
            table: table.clone(),
            key_columns: key_columns.to_vec(),
        };
        let mut renderer = Renderer::new(self);
        delete.render(&mut renderer);
        Statement {
            kind: StatementKind::Delete,
            table: table.to_string(),
            columns: key_columns.to_vec(),
            sql: renderer.finish(),
        }
    }

    /// `SELECT * FROM t [WHERE key >=|> ?] [AND key <= ?] ORDER BY key ASC LIMIT n`
    ///
    /// Parameters: the lower bound (if any) followed by the upper bound (if
    /// `bounded`).
    fn build_chunked_query(
        &self,
        table: &TableRef,
        key_column: &str,
        lower: Option<LowerBound>,
        bounded: bool,
        batch_size: usize,
    ) -> Statement {
        let mut filter = Vec::new();
        if let Some(lower) = lower {
            let op = match lower {
                LowerBound::Inclusive => CmpOp::GtEq,
                LowerBound::Exclusive => CmpOp::Gt,
            };
            filter.push(Predicate {
                column: key_column.to_string(),
                op,
            });
        }
        if bounded {
            filter.push(Predicate {
                column: key_column.to_string(),
                op: CmpOp::LtEq,
            });
        }
        let columns = filter.iter().map(|p| p.column.clone()).collect();
        let select = Select {
            table: table.clone(),
            projection: Projection::All,
            filter,
            order_by: Some(key_column.to_string()),
            limit: Some(batch_size),
        };
        self.render_select(select, columns)
    }

    /// `SELECT * FROM t WHERE key = ?`, used when a page cannot advance on a
    /// non-unique ordering column.
    fn build_point_query(&self, table: &TableRef, key_column: &str) -> Statement {
        let select = Select {
            table: table.clone(),
            projection: Projection::All,
            filter: vec![Predicate {
                column: key_column.to_string(),
                op: CmpOp::Eq,
            }],
            order_by: None,
            limit: None,
        };
        self.render_select(select, vec![key_column.to_string()])
    }

    fn build_count_query(&self, table: &TableRef) -> Statement {
        let select = Select {
            table: table.clone(),
            projection: Projection::Count,
            ..Default::default()
        };
        self.render_select(select, Vec::new())
    }

    #[doc(hidden)]
    fn render_select(&self, select: Select, columns: Vec<String>) -> Statement {
        let mut renderer = Renderer::new(self);
        select.render(&mut renderer);
        Statement {
            kind: StatementKind::Select,
            table: select.table.to_string(),
            columns,
            sql: renderer.finish(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Postgres;

impl Dialect for Postgres {
    fn name(&self) -> &'static str {
        "PostgreSQL"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        format!(r#""{}""#, ident.replace('"', r#""""#))
    }

    fn get_placeholder(&self, index: usize) -> String {
        // PostgreSQL uses $1, $2, etc.
        format!("${}", index + 1)
    }

    fn upsert_clause(&self, on_conflict: &OnConflict) -> String {
        if on_conflict.columns.is_empty() {
            return String::new();
        }
        let keys: Vec<String> = on_conflict
            .columns
            .iter()
            .map(|c| self.quote_identifier(c))
            .collect();
        if on_conflict.update_columns.is_empty() {
            return format!("ON CONFLICT ({}) DO NOTHING", keys.join(", "));
        }
        let assignments: Vec<String> = on_conflict
            .update_columns
            .iter()
            .map(|c| {
                let quoted = self.quote_identifier(c);
                format!("{quoted} = EXCLUDED.{quoted}")
            })
            .collect();
        format!(
            "ON CONFLICT ({}) DO UPDATE SET {}",
            keys.join(", "),
            assignments.join(", ")
        )
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MySql;

impl Dialect for MySql {
    fn name(&self) -> &'static str {
        "MySQL"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        format!("`{}`", ident.replace('`', "``"))
    }

    fn get_placeholder(&self, _index: usize) -> String {
        // MySQL uses ?
        "?".into()
    }

    fn upsert_clause(&self, on_conflict: &OnConflict) -> String {
        // MySQL detects the conflict on any unique index by itself.
        let assignments: Vec<String> = if on_conflict.update_columns.is_empty() {
            on_conflict
                .columns
                .iter()
                .take(1)
                .map(|c| {
                    let quoted = self.quote_identifier(c);
                    format!("{quoted} = {quoted}")
                })
                .collect()
        } else {
            on_conflict
                .update_columns
                .iter()
                .map(|c| {
                    let quoted = self.quote_identifier(c);
                    format!("{quoted} = VALUES({quoted})")
                })
                .collect()
        };
        if assignments.is_empty() {
            return String::new();
        }
        format!("ON DUPLICATE KEY UPDATE {}", assignments.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table_ref;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_chunked_query_bounds() {
        let table = table_ref!("t_order");
        let first = Postgres.build_chunked_query(
            &table,
            "order_id",
            Some(LowerBound::Inclusive),
            true,
            1000,
        );
        assert_eq!(
            first.sql,
            r#"SELECT * FROM "t_order" WHERE "order_id" >= $1 AND "order_id" <= $2 ORDER BY "order_id" ASC LIMIT 1000"#
        );

        let next = MySql.build_chunked_query(
            &table,
            "order_id",
            Some(LowerBound::Exclusive),
            false,
            500,
        );
        assert_eq!(
            next.sql,
            "SELECT * FROM `t_order` WHERE `order_id` > ? ORDER BY `order_id` ASC LIMIT 500"
        );

        let open = MySql.build_chunked_query(&table, "order_id", None, false, 10);
        assert_eq!(
            open.sql,
            "SELECT * FROM `t_order` ORDER BY `order_id` ASC LIMIT 10"
        );
    }

    #[test]
    fn test_update_template_numbers_key_after_set_list() {
        let table = table_ref!("public", "t_order");
        let template = Postgres.build_update(&table, &keys(&["order_id"]));
        assert_eq!(
            template.template(),
            r#"UPDATE "public"."t_order" SET %s WHERE %w"#
        );

        let statement = template.fill(&Postgres, &keys(&["status", "amount"]));
        assert_eq!(
            statement.sql,
            r#"UPDATE "public"."t_order" SET "status" = $1, "amount" = $2 WHERE "order_id" = $3"#
        );
        assert_eq!(statement.columns, keys(&["status", "amount", "order_id"]));
        assert_eq!(statement.shape(), "UPDATE public.t_order(status, amount, order_id)");
    }

    #[test]
    fn test_delete_with_composite_key() {
        let statement =
            MySql.build_delete(&table_ref!("t_order_item"), &keys(&["order_id", "item_id"]));
        assert_eq!(
            statement.sql,
            "DELETE FROM `t_order_item` WHERE `order_id` = ? AND `item_id` = ?"
        );
    }

    #[test]
    fn test_point_and_count_queries() {
        let table = table_ref!("t_log");
        assert_eq!(
            Postgres.build_point_query(&table, "created_at").sql,
            r#"SELECT * FROM "t_log" WHERE "created_at" = $1"#
        );
        assert_eq!(
            Postgres.build_count_query(&table).sql,
            r#"SELECT COUNT(*) FROM "t_log""#
        );
        assert_eq!(
            MySql.build_count_query(&table).sql,
            "SELECT COUNT(*) FROM `t_log`"
        );
    }

    #[test]
    fn test_quote_identifier_escapes_quotes() {
        assert_eq!(Postgres.quote_identifier(r#"we"ird"#), r#""we""ird""#);
        assert_eq!(MySql.quote_identifier("we`ird"), "`we``ird`");
    }
}
