//! Static mapping from a database type tag to its dialect.

use crate::query::dialect::{Dialect, MySql, Postgres};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DialectError {
    #[error("unsupported database type `{0}`")]
    UnknownDatabaseType(String),
}

type DialectConstructor = fn() -> Arc<dyn Dialect>;

const REGISTRY: &[(&str, DialectConstructor)] = &[
    ("postgresql", || Arc::new(Postgres)),
    ("postgres", || Arc::new(Postgres)),
    ("opengauss", || Arc::new(Postgres)),
    ("mysql", || Arc::new(MySql)),
    ("mariadb", || Arc::new(MySql)),
];

/// Resolves a dialect by database type, case-insensitively.
pub fn dialect_for(database_type: &str) -> Result<Arc<dyn Dialect>, DialectError> {
    let tag = database_type.trim().to_ascii_lowercase();
    REGISTRY
        .iter()
        .find(|(name, _)| *name == tag)
        .map(|(_, constructor)| constructor())
        .ok_or_else(|| DialectError::UnknownDatabaseType(database_type.to_string()))
}

pub fn is_supported(database_type: &str) -> bool {
    dialect_for(database_type).is_ok()
}

pub fn supported_types() -> Vec<&'static str> {
    REGISTRY.iter().map(|(name, _)| *name).collect()
}
