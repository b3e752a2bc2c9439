//! Defines the AST for the single-table reads issued by the pipeline.

use crate::query::ast::common::TableRef;

#[derive(Debug, Clone, Default, PartialEq)]
pub enum Projection {
    #[default]
    All,
    Count,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    Gt,
    GtEq,
    LtEq,
}

impl CmpOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Gt => ">",
            CmpOp::GtEq => ">=",
            CmpOp::LtEq => "<=",
        }
    }
}

/// `column <op> ?`
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub column: String,
    pub op: CmpOp,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Select {
    pub table: TableRef,
    pub projection: Projection,
    /// Conjunction of predicates, each bound to one parameter in order.
    pub filter: Vec<Predicate>,
    pub order_by: Option<String>,
    pub limit: Option<usize>,
}
