pub mod error;
pub mod progress;
pub mod rate_limit;
pub mod retry;
pub mod state;
