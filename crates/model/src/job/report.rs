use crate::job::status::JobStatus;
use serde::{Deserialize, Serialize};

/// One row of `SHOW SCALING STATUS`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobItemStatusRow {
    pub item: usize,
    pub data_source: String,
    pub status: JobStatus,
    pub active: bool,
    pub inventory_finished_percentage: u8,
    pub incremental_idle_seconds: Option<i64>,
    pub error_message: Option<String>,
}

/// One row of `CHECK SCALING`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCheckResult {
    pub table_name: String,
    pub source_records_count: u64,
    pub target_records_count: u64,
    pub records_count_matched: bool,
    pub records_content_matched: bool,
}

impl TableCheckResult {
    pub fn is_matched(&self) -> bool {
        self.records_count_matched && self.records_content_matched
    }
}
