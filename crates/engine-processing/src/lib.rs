pub mod check;
pub mod error;
pub mod importer;
pub mod merger;
pub mod retry;
pub mod task;
