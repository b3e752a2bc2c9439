pub mod cached;
pub mod information_schema;
pub mod loader;
