use crate::query::ast::common::TableRef;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Delete {
    pub table: TableRef,
    pub key_columns: Vec<String>,
}
