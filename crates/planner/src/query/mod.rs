pub mod ast;
pub mod cache;
pub mod dialect;
pub mod macros;
pub mod registry;
pub mod renderer;
pub mod statement;
