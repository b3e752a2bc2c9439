//! Minimal statement ASTs for the pipeline's read and write paths.
//!
//! Values are never embedded; every value position renders as a dialect
//! placeholder and is bound by the connection at execution time.

pub mod common;
pub mod delete;
pub mod insert;
pub mod select;
