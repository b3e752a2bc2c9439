use crate::records::record::DataRecord;

/// Per-table output of the record merger.
///
/// Batch lists hold records on distinct, stable keys that may be executed
/// together. `non_batch_records` keeps strict source order for everything
/// else.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupedDataRecord {
    pub table_name: String,
    pub batch_insert_records: Vec<DataRecord>,
    pub batch_update_records: Vec<DataRecord>,
    pub batch_delete_records: Vec<DataRecord>,
    pub non_batch_records: Vec<DataRecord>,
}

impl GroupedDataRecord {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.batch_insert_records.len()
            + self.batch_update_records.len()
            + self.batch_delete_records.len()
            + self.non_batch_records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
