pub mod incremental;
pub mod inventory;
