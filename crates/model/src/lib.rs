pub mod core;
pub mod job;
pub mod metadata;
pub mod pipeline;
pub mod records;
