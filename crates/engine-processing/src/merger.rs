//! Coalesces an ordered run of captured changes into per-table groups.
//!
//! Records on distinct keys land in the batch lists. A key seen more than once
//! in the run sends its records to `non_batch_records` in original order,
//! except an insert followed by plain updates of the same row, which collapse
//! into one insert carrying the latest values. Non-batch status spreads to
//! every record sharing a key with a non-batch record, including the old key
//! of a key-changing update.

use crate::error::MergeError;
use model::records::{
    column::Column,
    grouped::GroupedDataRecord,
    record::{ChangeType, DataRecord, RecordKey},
};
use std::collections::HashMap;

struct Entry {
    record: DataRecord,
    non_batch: bool,
}

#[derive(Default)]
struct TableRun {
    table_name: String,
    entries: Vec<Entry>,
    /// Entries by the key they leave behind (see `DataRecord::grouping_key`).
    by_key: HashMap<RecordKey, Vec<usize>>,
    /// Entries by every key they touch: the resulting key and, for
    /// key-changing updates, the key they move away from.
    touching: HashMap<RecordKey, Vec<usize>>,
    /// Old keys of key-changing updates, pointing at the update.
    vacated: HashMap<RecordKey, usize>,
}

impl TableRun {
    fn new(table_name: &str) -> Self {
        Self {
            table_name: table_name.to_string(),
            ..Default::default()
        }
    }

    fn push(&mut self, record: &DataRecord) {
        let key = record.grouping_key();

        if self.try_collapse(&key, record) {
            return;
        }

        let index = self.entries.len();
        let old_key = record.is_key_changed().then(|| record.old_key());
        let mut non_batch = false;

        if let Some(previous) = self.by_key.get(&key) {
            let previous = previous.clone();
            for i in previous {
                self.mark_non_batch(i);
            }
            non_batch = true;
        }
        if let Some(&vacating) = self.vacated.get(&key) {
            self.mark_non_batch(vacating);
            non_batch = true;
        }
        non_batch |= std::iter::once(&key)
            .chain(old_key.as_ref())
            .filter_map(|k| self.touching.get(k))
            .flatten()
            .any(|&i| self.entries[i].non_batch);

        self.entries.push(Entry {
            record: record.clone(),
            non_batch: false,
        });
        self.by_key.entry(key.clone()).or_default().push(index);
        self.touching.entry(key).or_default().push(index);
        if let Some(old_key) = old_key {
            self.touching.entry(old_key.clone()).or_default().push(index);
            self.vacated.insert(old_key, index);
        }
        if non_batch {
            self.mark_non_batch(index);
        }
    }

    /// Marks `index` non-batch together with every entry sharing a key with
    /// it, transitively. Afterwards no batch entry shares a key with a
    /// non-batch one.
    fn mark_non_batch(&mut self, index: usize) {
        let mut pending = vec![index];
        while let Some(i) = pending.pop() {
            if std::mem::replace(&mut self.entries[i].non_batch, true) && i != index {
                continue;
            }
            let record = &self.entries[i].record;
            let mut keys = vec![record.grouping_key()];
            if record.is_key_changed() {
                keys.push(record.old_key());
            }
            for key in keys {
                if let Some(linked) = self.touching.get(&key) {
                    pending.extend(linked.iter().copied().filter(|&j| !self.entries[j].non_batch));
                }
            }
        }
    }

    /// Folds a plain update into a still-batchable insert of the same row.
    fn try_collapse(&mut self, key: &RecordKey, record: &DataRecord) -> bool {
        if record.change_type() != ChangeType::Update || record.is_key_changed() {
            return false;
        }
        let Some([only]) = self.by_key.get(key).map(Vec::as_slice) else {
            return false;
        };
        let entry = &mut self.entries[*only];
        if entry.non_batch || entry.record.change_type() != ChangeType::Insert {
            return false;
        }

        entry.record = apply_update(&entry.record, record);
        true
    }

    fn finish(self) -> GroupedDataRecord {
        let mut group = GroupedDataRecord::new(self.table_name);
        for entry in self.entries {
            if entry.non_batch {
                group.non_batch_records.push(entry.record);
                continue;
            }
            match entry.record.change_type() {
                ChangeType::Insert => group.batch_insert_records.push(entry.record),
                ChangeType::Update => group.batch_update_records.push(entry.record),
                ChangeType::Delete => group.batch_delete_records.push(entry.record),
            }
        }
        group
    }
}

/// The insert's row with the update's after image applied. Columns only the
/// update knows about are appended.
fn apply_update(insert: &DataRecord, update: &DataRecord) -> DataRecord {
    let mut columns: Vec<Column> = insert
        .columns()
        .iter()
        .map(|column| match update.column(&column.name) {
            Some(changed) => Column::new(
                column.name.clone(),
                changed.after().clone(),
                true,
                column.unique_key,
            ),
            None => column.clone(),
        })
        .collect();
    for column in update.columns() {
        if insert.column(&column.name).is_none() {
            columns.push(Column::new(
                column.name.clone(),
                column.after().clone(),
                true,
                column.unique_key,
            ));
        }
    }
    DataRecord::new(
        ChangeType::Insert,
        insert.table_name(),
        update.position().clone(),
        columns,
    )
}

/// Groups `records` by table, tables in order of first appearance.
pub fn group(records: &[DataRecord]) -> Result<Vec<GroupedDataRecord>, MergeError> {
    let mut order: Vec<String> = Vec::new();
    let mut runs: HashMap<String, TableRun> = HashMap::new();

    for record in records {
        if !record.has_unique_key() {
            return Err(MergeError::MissingUniqueKey {
                table: record.table_name().to_string(),
            });
        }
        let run = runs
            .entry(record.table_name().to_string())
            .or_insert_with(|| {
                order.push(record.table_name().to_string());
                TableRun::new(record.table_name())
            });
        run.push(record);
    }

    Ok(order
        .into_iter()
        .filter_map(|table| runs.remove(&table))
        .map(TableRun::finish)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::{core::value::Value, pipeline::position::Position};

    fn pos(n: usize) -> Position {
        Position::stream(format!("binlog.000001:{n}"))
    }

    fn insert(table: &str, id: i64, a: i64) -> DataRecord {
        DataRecord::new(
            ChangeType::Insert,
            table,
            pos(0),
            vec![
                Column::new("id", Value::Int(id), true, true),
                Column::new("a", Value::Int(a), true, false),
            ],
        )
    }

    fn update(table: &str, old_id: i64, id: i64, old_a: i64, a: i64) -> DataRecord {
        DataRecord::new(
            ChangeType::Update,
            table,
            pos(0),
            vec![
                Column::changed("id", Value::Int(old_id), Value::Int(id), true),
                Column::changed("a", Value::Int(old_a), Value::Int(a), false),
            ],
        )
    }

    fn delete(table: &str, id: i64, a: i64) -> DataRecord {
        DataRecord::new(
            ChangeType::Delete,
            table,
            pos(0),
            vec![
                Column::deleted("id", Value::Int(id), true),
                Column::deleted("a", Value::Int(a), false),
            ],
        )
    }

    fn counts(group: &GroupedDataRecord) -> (usize, usize, usize, usize) {
        (
            group.batch_insert_records.len(),
            group.batch_update_records.len(),
            group.batch_delete_records.len(),
            group.non_batch_records.len(),
        )
    }

    fn key_of(record: &DataRecord) -> (i64, i64) {
        let old = record.old_key().values[0].as_i64().unwrap_or_default();
        let new = record.key().values[0].as_i64().unwrap_or_default();
        (old, new)
    }

    #[test]
    fn insert_before_update_collapses() {
        let groups = group(&[insert("t1", 1, 1), update("t1", 1, 1, 1, 2)]).unwrap();

        assert_eq!(groups.len(), 1);
        assert_eq!(counts(&groups[0]), (1, 0, 0, 0));
        let merged = &groups[0].batch_insert_records[0];
        assert_eq!(merged.change_type(), ChangeType::Insert);
        assert_eq!(merged.column("a").unwrap().after(), &Value::Int(2));
    }

    #[test]
    fn key_changing_update_chain_stays_batched() {
        let groups = group(&[update("t1", 1, 2, 1, 1), update("t1", 2, 3, 2, 2)]).unwrap();

        assert_eq!(counts(&groups[0]), (0, 2, 0, 0));
        let updates = &groups[0].batch_update_records;
        assert_eq!(key_of(&updates[0]), (1, 2));
        assert_eq!(key_of(&updates[1]), (2, 3));
        assert_eq!(updates[0].column("a").unwrap().after(), &Value::Int(1));
        assert_eq!(updates[1].column("a").unwrap().after(), &Value::Int(2));
    }

    #[test]
    fn insert_then_delete_is_kept_as_ordered_pair() {
        let groups = group(&[insert("t1", 1, 1), delete("t1", 1, 1)]).unwrap();

        assert_eq!(counts(&groups[0]), (0, 0, 0, 2));
        let kinds: Vec<_> = groups[0]
            .non_batch_records
            .iter()
            .map(DataRecord::change_type)
            .collect();
        assert_eq!(kinds, vec![ChangeType::Insert, ChangeType::Delete]);
    }

    #[test]
    fn update_then_update_is_not_collapsed() {
        let groups = group(&[update("t1", 1, 1, 1, 2), update("t1", 1, 1, 2, 3)]).unwrap();
        assert_eq!(counts(&groups[0]), (0, 0, 0, 2));
    }

    #[test]
    fn reuse_of_vacated_key_is_ordered() {
        let groups = group(&[update("t1", 1, 2, 1, 1), insert("t1", 1, 9)]).unwrap();

        assert_eq!(counts(&groups[0]), (0, 0, 0, 2));
        assert_eq!(
            groups[0].non_batch_records[0].change_type(),
            ChangeType::Update
        );
        assert_eq!(
            groups[0].non_batch_records[1].change_type(),
            ChangeType::Insert
        );
    }

    #[test]
    fn key_change_after_reordered_history_is_ordered() {
        let records = vec![
            insert("t1", 1, 1),
            delete("t1", 1, 1),
            insert("t1", 1, 2),
            update("t1", 1, 2, 2, 2),
        ];
        let groups = group(&records).unwrap();
        assert_eq!(groups[0].non_batch_records, records);
    }

    #[test]
    fn reusing_a_vacated_key_orders_the_whole_chain() {
        let records = vec![
            update("t1", 1, 2, 1, 1),
            update("t1", 2, 3, 2, 2),
            insert("t1", 1, 9),
        ];
        let groups = group(&records).unwrap();
        assert_eq!(counts(&groups[0]), (0, 0, 0, 3));
        assert_eq!(groups[0].non_batch_records, records);
    }

    #[test]
    fn groups_by_table_in_order_of_first_appearance() {
        let records = vec![
            insert("t2", 100, 1),
            insert("t1", 1, 1),
            update("t1", 1, 1, 1, 2),
            delete("t1", 9, 9),
            insert("t2", 101, 1),
            insert("t1", 2, 1),
            delete("t1", 2, 1),
            update("t1", 3, 3, 1, 2),
            delete("t1", 3, 2),
            update("t2", 100, 100, 1, 5),
            update("t1", 4, 4, 1, 2),
            update("t1", 4, 4, 2, 3),
        ];

        let groups = group(&records).unwrap();

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].table_name, "t2");
        assert_eq!(groups[1].table_name, "t1");
        assert_eq!(counts(&groups[1]), (1, 0, 1, 6));
        assert_eq!(counts(&groups[0]), (2, 0, 0, 0));
    }

    #[test]
    fn non_batch_records_keep_source_order() {
        let records = vec![
            insert("t1", 1, 1),
            update("t1", 2, 2, 1, 2),
            delete("t1", 1, 1),
            update("t1", 2, 2, 2, 3),
            insert("t1", 1, 5),
            delete("t1", 2, 3),
        ];
        let groups = group(&records).unwrap();

        assert_eq!(groups[0].non_batch_records, records);
    }

    #[test]
    fn rejects_records_without_unique_key() {
        let keyless = DataRecord::new(
            ChangeType::Insert,
            "t_log",
            pos(0),
            vec![Column::new("msg", Value::from("hello"), true, false)],
        );
        assert!(matches!(
            group(&[keyless]),
            Err(MergeError::MissingUniqueKey { table }) if table == "t_log"
        ));
    }
}
