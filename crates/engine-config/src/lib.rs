pub mod check;
pub mod error;
pub mod importer;
pub mod job;
pub mod rule;
