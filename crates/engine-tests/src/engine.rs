//! Task-level behaviour against in-memory databases: keyset paging, resume,
//! cooperative stop and change replay.

#[cfg(test)]
mod tests {
    use crate::utils::{
        POSTGRES, FakeDatabase, ScriptedSource, column, database_with_orders, delete_event,
        insert_event, job_json, order_ids, order_row, orders_table, status_update_event,
        stream_position,
    };
    use connectors::source::ChangeEvent;
    use engine_config::{
        check::CheckAlgorithm, importer::ImporterConfiguration, job::JobConfiguration,
    };
    use engine_core::{
        progress::{ProgressEvent, ProgressReceiver, ProgressReporter, TaskKind, progress_channel},
        retry::RetryPolicy,
    };
    use engine_processing::{
        check::{CheckEndpoint, ConsistencyChecker},
        error::{CheckError, ImporterError, InventoryError},
        importer::Importer,
        task::{
            incremental::IncrementalTask,
            inventory::{InventoryTask, InventoryTaskConfig},
        },
    };
    use model::{
        core::{data_type::DataType, value::Value},
        metadata::table::TableMetaData,
        pipeline::position::{KeyBound, Position},
        records::{
            column::Column,
            record::{ChangeType, DataRecord},
        },
    };
    use engine_runtime::execution::engine::ExecuteEngine;
    use planner::query::{ast::common::TableRef, cache::StatementCache, registry::dialect_for};
    use std::{collections::BTreeMap, sync::Arc, time::Duration};
    use tokio_util::sync::CancellationToken;
    use tracing::Instrument;
    use tracing_test::traced_test;

    fn importer(target: &Arc<FakeDatabase>, tables: &str) -> Arc<Importer> {
        let job = JobConfiguration::from_json(&job_json(&["ds_0"], tables, "")).unwrap();
        let config = ImporterConfiguration::from_job(&job).unwrap();
        let importer = Importer::new(
            config,
            target.clone(),
            target.clone(),
            dialect_for(POSTGRES).unwrap(),
        )
        .with_retry_policy(RetryPolicy::from_retry_times(3).without_delay());
        Arc::new(importer)
    }

    fn orders_importer(target: &Arc<FakeDatabase>) -> Arc<Importer> {
        importer(target, r#"[{"logic_table": "t_order"}]"#)
    }

    fn inventory_config(
        logic_table: &str,
        actual_table: &str,
        unique_key: Option<&str>,
        batch_size: usize,
    ) -> InventoryTaskConfig {
        InventoryTaskConfig {
            task_id: format!("ds_0.{actual_table}"),
            logic_table: logic_table.to_string(),
            actual_table: actual_table.to_string(),
            schema: None,
            unique_key: unique_key.map(str::to_string),
            batch_size,
        }
    }

    struct Inventory {
        task: InventoryTask,
        events: ProgressReceiver,
        cancel: CancellationToken,
    }

    fn inventory(
        config: InventoryTaskConfig,
        position: Position,
        source: &Arc<FakeDatabase>,
        importer: Arc<Importer>,
    ) -> Inventory {
        let (sender, events) = progress_channel();
        let reporter = ProgressReporter::new(TaskKind::Inventory, config.task_id.clone(), sender);
        let cancel = CancellationToken::new();
        let task = InventoryTask::new(
            config,
            position,
            source.clone(),
            source.clone(),
            Arc::new(StatementCache::new(dialect_for(POSTGRES).unwrap())),
            importer,
            reporter,
            cancel.clone(),
        );
        Inventory {
            task,
            events,
            cancel,
        }
    }

    fn drain(events: &mut ProgressReceiver) -> Vec<ProgressEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = events.try_recv() {
            drained.push(event);
        }
        drained
    }

    fn from_key(key: i64) -> Position {
        Position::range(Some(KeyBound::Integer(key)), None)
    }

    #[traced_test]
    #[tokio::test]
    async fn exact_multiple_needs_one_empty_read() {
        let source = database_with_orders("t_order_0", 1..=4);
        let target = database_with_orders("t_order", []);
        let mut inv = inventory(
            inventory_config("t_order", "t_order_0", None, 2),
            from_key(1),
            &source,
            orders_importer(&target),
        );

        let position = inv.task.run().await.unwrap();

        assert_eq!(position, Position::Finished);
        assert_eq!(order_ids(&target, "t_order"), vec![1, 2, 3, 4]);
        let selects = source.selects();
        assert_eq!(selects.len(), 3);
        assert!(selects[0].contains(r#""order_id" >= $1"#));
        assert!(selects[1..].iter().all(|s| s.contains(r#""order_id" > $1"#)));

        let positions: Vec<_> = drain(&mut inv.events)
            .into_iter()
            .map(|e| (e.position, e.records))
            .collect();
        assert_eq!(
            positions,
            vec![(from_key(2), 2), (from_key(4), 2), (Position::Finished, 0)]
        );
    }

    #[traced_test]
    #[tokio::test]
    async fn short_page_finishes_without_extra_read() {
        let source = database_with_orders("t_order_0", 1..=5);
        let target = database_with_orders("t_order", []);
        let mut inv = inventory(
            inventory_config("t_order", "t_order_0", None, 2),
            Position::Placeholder,
            &source,
            orders_importer(&target),
        );

        assert_eq!(inv.task.run().await.unwrap(), Position::Finished);

        let selects = source.selects();
        assert_eq!(selects.len(), 3);
        assert!(!selects[0].contains("WHERE"));
        assert_eq!(order_ids(&target, "t_order"), vec![1, 2, 3, 4, 5]);
        assert!(logs_contain("Inventory task finished"));
    }

    #[traced_test]
    #[tokio::test]
    async fn page_sharing_one_key_value_switches_to_point_query() {
        let source = FakeDatabase::new();
        source.create_table(orders_table("t_order_0"));
        for (order_id, user_id) in [(1, 1), (2, 1), (3, 1), (4, 2), (5, 2)] {
            source.insert_row(
                "t_order_0",
                vec![
                    ("order_id", Value::Int(order_id)),
                    ("user_id", Value::Int(user_id)),
                    ("status", Value::from("NEW")),
                ],
            );
        }
        let target = database_with_orders("t_order", []);
        let mut inv = inventory(
            inventory_config("t_order", "t_order_0", Some("user_id"), 2),
            Position::Placeholder,
            &source,
            orders_importer(&target),
        );

        assert_eq!(inv.task.run().await.unwrap(), Position::Finished);

        assert_eq!(order_ids(&target, "t_order"), vec![1, 2, 3, 4, 5]);
        let point_queries = source
            .selects()
            .iter()
            .filter(|s| s.contains(r#""user_id" = $1"#))
            .count();
        assert_eq!(point_queries, 2);
    }

    #[traced_test]
    #[tokio::test]
    async fn rejects_unorderable_key_before_reading() {
        let source = FakeDatabase::new();
        source.create_table(TableMetaData::new(
            "t_event",
            vec![
                column(1, "created_at", DataType::Timestamp, true),
                column(2, "payload", DataType::VarChar, false),
            ],
            vec![],
        ));
        let target = FakeDatabase::new();
        let mut inv = inventory(
            inventory_config("t_event", "t_event", None, 10),
            Position::Placeholder,
            &source,
            importer(&target, r#"[{"logic_table": "t_event"}]"#),
        );

        let result = inv.task.run().await;

        assert!(matches!(
            result,
            Err(InventoryError::UnsupportedKeyType { ref column, .. }) if column == "created_at"
        ));
        assert!(source.selects().is_empty());
    }

    fn log_table() -> TableMetaData {
        TableMetaData::new(
            "t_log",
            vec![
                column(1, "message", DataType::VarChar, false),
                column(2, "level", DataType::VarChar, false),
            ],
            vec![],
        )
    }

    fn database_with_logs(lines: usize) -> Arc<FakeDatabase> {
        let db = FakeDatabase::new();
        db.create_table(log_table());
        for i in 0..lines {
            db.insert_row(
                "t_log",
                vec![
                    ("message", Value::String(format!("line {i}"))),
                    ("level", Value::from("INFO")),
                ],
            );
        }
        db
    }

    #[traced_test]
    #[tokio::test]
    async fn table_without_key_is_rejected_on_every_attempt() {
        let source = database_with_logs(5);
        let target = database_with_logs(0);

        for _ in 0..2 {
            let mut inv = inventory(
                inventory_config("t_log", "t_log", None, 2),
                Position::Placeholder,
                &source,
                importer(&target, r#"[{"logic_table": "t_log"}]"#),
            );

            let result = inv.task.run().await;

            assert!(matches!(
                result,
                Err(InventoryError::MissingUniqueKey { ref table }) if table == "t_log"
            ));
            assert_eq!(inv.task.position(), &Position::Placeholder);
            assert!(drain(&mut inv.events).is_empty());
        }
        assert!(source.selects().is_empty());
        assert_eq!(target.row_count("t_log"), 0);
        assert!(target.statements().is_empty());
    }

    #[traced_test]
    #[tokio::test]
    async fn data_match_rejects_table_without_key_before_reading() {
        let endpoint = |db: &Arc<FakeDatabase>| CheckEndpoint {
            connection: db.clone(),
            metadata: db.clone(),
            statements: Arc::new(StatementCache::new(dialect_for(POSTGRES).unwrap())),
            table: TableRef::new(None, "t_log".to_string()),
        };
        let source = database_with_logs(5);
        let target = database_with_logs(5);
        let checker = ConsistencyChecker::new(CheckAlgorithm::DataMatch, 2);

        let result = checker
            .check("t_log", &[endpoint(&source)], &endpoint(&target))
            .await;

        assert!(matches!(
            result,
            Err(CheckError::MissingUniqueKey { ref table }) if table == "t_log"
        ));
        assert!(source.selects().is_empty());
        assert!(target.selects().is_empty());

        let by_count = ConsistencyChecker::new(CheckAlgorithm::Count, 2)
            .check("t_log", &[endpoint(&source)], &endpoint(&target))
            .await
            .unwrap();
        assert!(by_count.records_count_matched);
        assert_eq!(by_count.source_records_count, 5);
    }

    #[traced_test]
    #[tokio::test]
    async fn inventory_task_runs_on_the_worker_pool() {
        let source = database_with_orders("t_order_0", 1..=5);
        let target = database_with_orders("t_order", []);
        let Inventory {
            mut task,
            events: _events,
            ..
        } = inventory(
            inventory_config("t_order", "t_order_0", None, 2),
            Position::Placeholder,
            &source,
            orders_importer(&target),
        );
        let engine = ExecuteEngine::new(1);

        let handle = engine.submit("ds_0.t_order_0", async move { task.run().await });
        let position = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert_eq!(position, Position::Finished);
        assert_eq!(order_ids(&target, "t_order"), vec![1, 2, 3, 4, 5]);
    }

    #[traced_test]
    #[tokio::test]
    async fn resumes_after_read_failure_without_losing_rows() {
        let source = database_with_orders("t_order_0", 1..=7);
        let target = database_with_orders("t_order", []);
        source.fail_reads_after(Some(2));

        let mut first = inventory(
            inventory_config("t_order", "t_order_0", None, 2),
            from_key(1),
            &source,
            orders_importer(&target),
        );
        let failed = first.task.run().await;
        assert!(matches!(failed, Err(InventoryError::Read { .. })));
        let resume_from = first.task.position().clone();
        assert_eq!(resume_from, from_key(4));
        assert_eq!(order_ids(&target, "t_order"), vec![1, 2, 3, 4]);

        source.fail_reads_after(None);
        let mut second = inventory(
            inventory_config("t_order", "t_order_0", None, 2),
            resume_from,
            &source,
            orders_importer(&target),
        );
        assert_eq!(second.task.run().await.unwrap(), Position::Finished);

        assert_eq!(order_ids(&target, "t_order"), vec![1, 2, 3, 4, 5, 6, 7]);
        // Only the boundary row is read twice.
        assert_eq!(source.rows_read(), 8);
    }

    #[traced_test]
    #[tokio::test]
    async fn stop_applies_no_batch_after_the_in_flight_one() {
        let source = database_with_orders("t_order_0", 1..=10);
        let target = database_with_orders("t_order", []);
        let mut inv = inventory(
            inventory_config("t_order", "t_order_0", None, 2),
            from_key(1),
            &source,
            orders_importer(&target),
        );
        target.cancel_after_writes(2, inv.cancel.clone());

        let position = inv.task.run().await.unwrap();

        assert_eq!(position, from_key(4));
        assert_eq!(order_ids(&target, "t_order"), vec![1, 2, 3, 4]);
        assert_eq!(source.selects().len(), 2);
        assert!(logs_contain("Inventory task stopped"));
    }

    #[traced_test]
    #[tokio::test]
    async fn stopped_before_start_reads_nothing() {
        let source = database_with_orders("t_order_0", 1..=3);
        let target = database_with_orders("t_order", []);
        let mut inv = inventory(
            inventory_config("t_order", "t_order_0", None, 2),
            from_key(1),
            &source,
            orders_importer(&target),
        );
        inv.task.stop();

        assert_eq!(inv.task.run().await.unwrap(), from_key(1));
        assert!(source.selects().is_empty());
        assert_eq!(target.row_count("t_order"), 0);
        assert!(drain(&mut inv.events).is_empty());
    }

    #[traced_test]
    #[tokio::test]
    async fn transient_write_failures_are_retried() {
        let source = database_with_orders("t_order_0", 1..=3);
        let target = database_with_orders("t_order", []);
        target.fail_writes(2);
        let mut inv = inventory(
            inventory_config("t_order", "t_order_0", None, 10),
            Position::Placeholder,
            &source,
            orders_importer(&target),
        );

        assert_eq!(inv.task.run().await.unwrap(), Position::Finished);
        assert_eq!(order_ids(&target, "t_order"), vec![1, 2, 3]);
        let inserts = target
            .statements()
            .iter()
            .filter(|s| s.starts_with("INSERT"))
            .count();
        assert_eq!(inserts, 3);
    }

    #[traced_test]
    #[tokio::test]
    async fn exhausted_retries_fail_the_task() {
        let source = database_with_orders("t_order_0", 1..=3);
        let target = database_with_orders("t_order", []);
        target.fail_writes(10);
        let mut inv = inventory(
            inventory_config("t_order", "t_order_0", None, 10),
            Position::Placeholder,
            &source,
            orders_importer(&target),
        );

        let result = inv.task.run().await;

        assert!(matches!(
            result,
            Err(InventoryError::Import(ImporterError::Write { .. }))
        ));
        assert_eq!(inv.task.position(), &Position::Placeholder);
        assert_eq!(target.row_count("t_order"), 0);
    }

    struct Incremental {
        task: IncrementalTask,
        events: ProgressReceiver,
        cancel: CancellationToken,
    }

    fn incremental(
        script: Vec<ChangeEvent>,
        target: &Arc<FakeDatabase>,
        batch_size: usize,
        idle: Duration,
    ) -> Incremental {
        let (sender, events) = progress_channel();
        let reporter = ProgressReporter::new(TaskKind::Incremental, "ds_0.incremental", sender);
        let cancel = CancellationToken::new();
        let task = IncrementalTask::new(
            "ds_0.incremental",
            Position::stream("binlog.000001:00000000"),
            Box::new(ScriptedSource::new(script)),
            orders_importer(target),
            batch_size,
            idle,
            reporter,
            cancel.clone(),
        );
        Incremental {
            task,
            events,
            cancel,
        }
    }

    #[traced_test]
    #[tokio::test]
    async fn replays_windows_and_reports_last_record_position() {
        let target = database_with_orders("t_order", [7]);
        let script = vec![
            insert_event("t_order", 1, 1, "NEW"),
            status_update_event("t_order", 2, 1, "NEW", "PAID"),
            insert_event("t_order", 3, 2, "NEW"),
            delete_event("t_order", 4, 2),
            delete_event("t_order", 5, 7),
            ChangeEvent::Finished(stream_position(5)),
        ];
        let mut inc = incremental(script, &target, 3, Duration::from_millis(10));

        assert_eq!(inc.task.run().await.unwrap(), Position::Finished);

        assert_eq!(order_ids(&target, "t_order"), vec![1]);
        let status = target.rows("t_order", "order_id")[0].get_value("status");
        assert_eq!(status, Value::from("PAID"));

        let reported: Vec<_> = drain(&mut inc.events)
            .into_iter()
            .map(|e| (e.position, e.records))
            .collect();
        assert_eq!(
            reported,
            vec![
                (stream_position(3), 3),
                (stream_position(5), 2),
                (Position::Finished, 0),
            ]
        );
    }

    #[traced_test]
    #[tokio::test]
    async fn stop_while_idle_keeps_last_applied_position() {
        let target = database_with_orders("t_order", []);
        let script = vec![insert_event("t_order", 1, 1, "NEW")];
        let Incremental {
            mut task,
            mut events,
            cancel,
        } = incremental(script, &target, 10, Duration::from_millis(20));

        let handle = tokio::spawn(async move { task.run().await }.in_current_span());
        let first = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.position, stream_position(1));

        cancel.cancel();
        let position = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert_eq!(position, stream_position(1));
        assert_eq!(order_ids(&target, "t_order"), vec![1]);
        assert!(logs_contain("Incremental task stopped"));
        logs_assert(|lines: &[&str]| {
            let warned = lines
                .iter()
                .filter(|line| line.contains("WARN") && line.contains("Change source idle"))
                .count();
            match warned {
                1 => Ok(()),
                n => Err(format!("expected one idle warning, saw {n}")),
            }
        });
    }

    /// Small deterministic generator; keeps the replay below reproducible.
    struct Lcg(u64);

    impl Lcg {
        fn below(&mut self, bound: u64) -> u64 {
            self.0 = self
                .0
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (self.0 >> 33) % bound
        }
    }

    fn key_change_event(n: u64, old_id: i64, new_id: i64, status: &str) -> ChangeEvent {
        ChangeEvent::Record(DataRecord::new(
            ChangeType::Update,
            "t_order",
            stream_position(n),
            vec![
                Column::changed("order_id", Value::Int(old_id), Value::Int(new_id), true),
                Column::changed("status", Value::from(status), Value::from(status), false),
            ],
        ))
    }

    #[traced_test]
    #[tokio::test]
    async fn merged_replay_matches_sequential_application() {
        let mut rng = Lcg(42);
        let mut expected: BTreeMap<i64, (i64, String)> = BTreeMap::new();
        let mut script = Vec::new();

        for i in 0..300u64 {
            let n = i + 1;
            let key = rng.below(6) as i64 + 1;
            let status = format!("s{n}");
            let Some((user_id, current)) = expected.get(&key).cloned() else {
                script.push(insert_event("t_order", n, key, &status));
                expected.insert(key, (key % 3, status));
                continue;
            };
            match rng.below(4) {
                0 => {
                    script.push(delete_event("t_order", n, key));
                    expected.remove(&key);
                }
                1 => match (1..=6).find(|k| !expected.contains_key(k)) {
                    Some(free) => {
                        script.push(key_change_event(n, key, free, &current));
                        expected.remove(&key);
                        expected.insert(free, (user_id, current));
                    }
                    None => {
                        script.push(status_update_event("t_order", n, key, &current, &status));
                        expected.insert(key, (user_id, status));
                    }
                },
                _ => {
                    script.push(status_update_event("t_order", n, key, &current, &status));
                    expected.insert(key, (user_id, status));
                }
            }
        }
        script.push(ChangeEvent::Finished(stream_position(300)));

        let target = database_with_orders("t_order", []);
        let mut inc = incremental(script, &target, 17, Duration::from_millis(10));
        assert_eq!(inc.task.run().await.unwrap(), Position::Finished);

        let actual: BTreeMap<i64, (i64, String)> = target
            .rows("t_order", "order_id")
            .iter()
            .map(|row| {
                let id = row.get_value("order_id").as_i64().unwrap();
                let user_id = row.get_value("user_id").as_i64().unwrap();
                let status = match row.get_value("status") {
                    Value::String(s) => s,
                    other => panic!("unexpected status {other:?}"),
                };
                (id, (user_id, status))
            })
            .collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn order_row_helper_matches_orders_table() {
        let table = orders_table("t_order");
        for (name, _) in order_row(1) {
            assert!(table.column(name).is_some());
        }
    }
}
