pub mod engine;
pub mod factory;
pub mod runner;
pub mod supervisor;
