//! Per-table statement cache in front of a dialect.

use crate::query::{
    ast::{common::TableRef, insert::OnConflict},
    dialect::{Dialect, LowerBound},
    statement::{Statement, UpdateTemplate},
};
use std::{
    collections::HashMap,
    hash::Hash,
    sync::{Arc, RwLock},
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum StatementKey {
    Insert {
        table: TableRef,
        columns: Vec<String>,
        rows: usize,
    },
    Delete { table: TableRef },
    Chunked { table: TableRef, lower: Option<LowerBound>, bounded: bool },
    Point { table: TableRef },
    Count { table: TableRef },
}

/// Builds each statement shape once and hands out shared copies.
///
/// Statements are keyed by table plus the shape parameters that vary
/// between calls (row count, column list, bounds).
#[derive(Debug)]
pub struct StatementCache {
    dialect: Arc<dyn Dialect>,
    statements: RwLock<HashMap<StatementKey, Arc<Statement>>>,
    updates: RwLock<HashMap<TableRef, Arc<UpdateTemplate>>>,
}

impl StatementCache {
    pub fn new(dialect: Arc<dyn Dialect>) -> Self {
        Self {
            dialect,
            statements: RwLock::new(HashMap::new()),
            updates: RwLock::new(HashMap::new()),
        }
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    pub fn insert(
        &self,
        table: &TableRef,
        columns: &[String],
        rows: usize,
        on_conflict: Option<OnConflict>,
    ) -> Arc<Statement> {
        let key = StatementKey::Insert {
            table: table.clone(),
            columns: columns.to_vec(),
            rows,
        };
        self.get_or_build(&self.statements, key, || {
            self.dialect.build_insert(table, columns, rows, on_conflict)
        })
    }

    pub fn update(&self, table: &TableRef, key_columns: &[String]) -> Arc<UpdateTemplate> {
        self.get_or_build(&self.updates, table.clone(), || {
            self.dialect.build_update(table, key_columns)
        })
    }

    pub fn delete(&self, table: &TableRef, key_columns: &[String]) -> Arc<Statement> {
        let key = StatementKey::Delete {
            table: table.clone(),
        };
        self.get_or_build(&self.statements, key, || {
            self.dialect.build_delete(table, key_columns)
        })
    }

    pub fn chunked_query(
        &self,
        table: &TableRef,
        key_column: &str,
        lower: Option<LowerBound>,
        bounded: bool,
        batch_size: usize,
    ) -> Arc<Statement> {
        let key = StatementKey::Chunked {
            table: table.clone(),
            lower,
            bounded,
        };
        self.get_or_build(&self.statements, key, || {
            self.dialect
                .build_chunked_query(table, key_column, lower, bounded, batch_size)
        })
    }

    pub fn point_query(&self, table: &TableRef, key_column: &str) -> Arc<Statement> {
        let key = StatementKey::Point {
            table: table.clone(),
        };
        self.get_or_build(&self.statements, key, || {
            self.dialect.build_point_query(table, key_column)
        })
    }

    pub fn count_query(&self, table: &TableRef) -> Arc<Statement> {
        let key = StatementKey::Count {
            table: table.clone(),
        };
        self.get_or_build(&self.statements, key, || self.dialect.build_count_query(table))
    }

    fn get_or_build<K, V>(
        &self,
        map: &RwLock<HashMap<K, Arc<V>>>,
        key: K,
        build: impl FnOnce() -> V,
    ) -> Arc<V>
    where
        K: Eq + Hash,
    {
        if let Some(found) = map
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&key)
        {
            return Arc::clone(found);
        }
        let mut guard = map.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(guard.entry(key).or_insert_with(|| Arc::new(build())))
    }
}
