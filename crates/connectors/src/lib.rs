pub mod connection;
pub mod error;
pub mod factory;
pub mod metadata;
pub mod source;
pub mod sql;
