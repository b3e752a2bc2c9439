pub mod column;
pub mod grouped;
pub mod record;
pub mod row;
