//! In-memory stand-ins for the databases, catalogs and change streams a job
//! talks to.
//!
//! `FakeDatabase` interprets the PostgreSQL statements the planner renders:
//! keyset/point/stream/count selects, multi-row upserts, updates and deletes.

use async_trait::async_trait;
use connectors::{
    connection::{BoundStatement, Connection, ConnectionFactory, DataSourceConfig},
    error::{ConnectorError, DbError},
    metadata::loader::MetadataLoader,
    source::{ChangeEvent, ChangeEventSource, ChangeEventSourceFactory},
};
use engine_config::job::JobConfiguration;
use engine_runtime::execution::factory::Collaborators;
use model::{
    core::{data_type::DataType, value::Value},
    metadata::table::{ColumnMetaData, TableMetaData},
    pipeline::position::Position,
    records::{
        column::Column,
        record::{ChangeType, DataRecord},
        row::{FieldValue, RowData},
    },
};
use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashMap, VecDeque},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering as AtomicOrdering},
    },
};
use tokio_util::sync::CancellationToken;

pub const POSTGRES: &str = "PostgreSQL";

#[derive(Debug, Clone)]
struct FakeTable {
    metadata: TableMetaData,
    rows: Vec<Vec<FieldValue>>,
}

impl FakeTable {
    fn key_columns(&self) -> Vec<String> {
        self.metadata
            .unique_key_columns()
            .iter()
            .map(|c| c.name.clone())
            .collect()
    }
}

fn value_of<'a>(row: &'a [FieldValue], column: &str) -> &'a Value {
    row.iter()
        .find(|f| f.name.eq_ignore_ascii_case(column))
        .map(|f| &f.value)
        .unwrap_or(&Value::Null)
}

fn same_value(a: &Value, b: &Value) -> bool {
    a.compare(b) == Some(Ordering::Equal)
}

/// A condition `"col" <op> $n` of a WHERE clause.
struct Condition {
    column: String,
    op: String,
    param: usize,
}

impl Condition {
    fn matches(&self, row: &[FieldValue], params: &[Value]) -> bool {
        let Some(param) = params.get(self.param) else {
            return false;
        };
        let Some(ordering) = value_of(row, &self.column).compare(param) else {
            return false;
        };
        match self.op.as_str() {
            "=" => ordering == Ordering::Equal,
            ">" => ordering == Ordering::Greater,
            ">=" => ordering != Ordering::Less,
            "<" => ordering == Ordering::Less,
            "<=" => ordering != Ordering::Greater,
            _ => false,
        }
    }
}

/// Every `"..."` identifier in `sql`, in order.
fn quoted_identifiers(sql: &str) -> Vec<String> {
    let mut idents = Vec::new();
    let mut current: Option<String> = None;
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        match (&mut current, c) {
            (None, '"') => current = Some(String::new()),
            (Some(ident), '"') => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    ident.push('"');
                } else {
                    idents.extend(current.take());
                }
            }
            (Some(ident), c) => ident.push(c),
            (None, _) => {}
        }
    }
    idents
}

/// `$3` -> 2
fn placeholder_index(token: &str) -> Option<usize> {
    token
        .trim_matches(|c: char| c == ',' || c == ')' || c == '(')
        .strip_prefix('$')?
        .parse::<usize>()
        .ok()?
        .checked_sub(1)
}

fn parse_conditions(clause: &str) -> Vec<Condition> {
    clause
        .split(" AND ")
        .filter_map(|part| {
            let column = quoted_identifiers(part).into_iter().next()?;
            let rest = &part[part.rfind('"')? + 1..];
            let mut tokens = rest.split_whitespace();
            let op = tokens.next()?.to_string();
            let param = placeholder_index(tokens.next()?)?;
            Some(Condition { column, op, param })
        })
        .collect()
}

fn between<'a>(sql: &'a str, start: &str, end: &[&str]) -> Option<&'a str> {
    let from = sql.find(start)? + start.len();
    let rest = &sql[from..];
    let to = end
        .iter()
        .filter_map(|marker| rest.find(marker))
        .min()
        .unwrap_or(rest.len());
    Some(&rest[..to])
}

fn fake_error(table: &str, reason: &str) -> DbError {
    DbError::InvalidMetadata {
        table: table.to_string(),
        reason: reason.to_string(),
    }
}

fn transient_error() -> DbError {
    DbError::Io(std::io::Error::new(
        std::io::ErrorKind::ConnectionReset,
        "connection reset by fake",
    ))
}

/// One in-memory database with a statement log and failure injection.
#[derive(Default)]
pub struct FakeDatabase {
    tables: Mutex<BTreeMap<String, FakeTable>>,
    statements: Mutex<Vec<String>>,
    rows_read: AtomicUsize,
    metadata_loads: AtomicUsize,
    write_failures: AtomicUsize,
    reads_before_failure: Mutex<Option<usize>>,
    cancel_after_writes: Mutex<Option<(usize, CancellationToken)>>,
}

impl FakeDatabase {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn create_table(&self, metadata: TableMetaData) {
        self.tables.lock().unwrap().insert(
            metadata.table_name.clone(),
            FakeTable {
                metadata,
                rows: Vec::new(),
            },
        );
    }

    pub fn insert_row(&self, table: &str, row: Vec<(&str, Value)>) {
        let mut tables = self.tables.lock().unwrap();
        let table = tables.get_mut(table).expect("table exists");
        table.rows.push(
            row.into_iter()
                .map(|(name, value)| FieldValue {
                    name: name.to_string(),
                    value,
                })
                .collect(),
        );
    }

    pub fn set_value(&self, table: &str, key: (&str, Value), column: &str, value: Value) {
        let mut tables = self.tables.lock().unwrap();
        let table = tables.get_mut(table).expect("table exists");
        for row in &mut table.rows {
            if same_value(value_of(row, key.0), &key.1) {
                for field in row.iter_mut().filter(|f| f.name == column) {
                    field.value = value.clone();
                }
            }
        }
    }

    /// Rows of `table` ordered by `column`.
    pub fn rows(&self, table: &str, order_by: &str) -> Vec<RowData> {
        let tables = self.tables.lock().unwrap();
        let mut rows: Vec<RowData> = tables
            .get(table)
            .map(|t| t.rows.iter().map(|r| RowData::new(table, r.clone())).collect())
            .unwrap_or_default();
        rows.sort_by(|a, b| {
            a.get_value(order_by)
                .compare(&b.get_value(order_by))
                .unwrap_or(Ordering::Equal)
        });
        rows
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .map_or(0, |t| t.rows.len())
    }

    /// Every statement received, in order.
    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    pub fn selects(&self) -> Vec<String> {
        self.statements()
            .into_iter()
            .filter(|s| s.starts_with("SELECT"))
            .collect()
    }

    pub fn rows_read(&self) -> usize {
        self.rows_read.load(AtomicOrdering::SeqCst)
    }

    pub fn metadata_loads(&self) -> usize {
        self.metadata_loads.load(AtomicOrdering::SeqCst)
    }

    /// The next `count` write batches fail with a retryable I/O error.
    pub fn fail_writes(&self, count: usize) {
        self.write_failures.store(count, AtomicOrdering::SeqCst);
    }

    /// Reads succeed `count` more times, then fail until cleared.
    pub fn fail_reads_after(&self, count: Option<usize>) {
        *self.reads_before_failure.lock().unwrap() = count;
    }

    /// Cancels `token` once `count` more write batches have been applied.
    pub fn cancel_after_writes(&self, count: usize, token: CancellationToken) {
        *self.cancel_after_writes.lock().unwrap() = Some((count, token));
    }

    fn after_write(&self) {
        let mut pending = self.cancel_after_writes.lock().unwrap();
        if let Some((remaining, token)) = pending.as_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                token.cancel();
                *pending = None;
            }
        }
    }

    fn check_read_failure(&self) -> Result<(), DbError> {
        let mut remaining = self.reads_before_failure.lock().unwrap();
        match remaining.as_mut() {
            Some(0) => Err(fake_error("*", "injected read failure")),
            Some(n) => {
                *n -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn select(&self, sql: &str, params: &[Value]) -> Result<Vec<RowData>, DbError> {
        let idents = quoted_identifiers(sql);
        let table_name = idents.first().cloned().unwrap_or_default();
        let tables = self.tables.lock().unwrap();
        let table = tables
            .get(&table_name)
            .ok_or_else(|| DbError::TableNotFound(table_name.clone()))?;

        if sql.starts_with("SELECT COUNT(*)") {
            let count = FieldValue {
                name: "count".into(),
                value: Value::Int(table.rows.len() as i64),
            };
            return Ok(vec![RowData::new(&table_name, vec![count])]);
        }

        let conditions = between(sql, " WHERE ", &[" ORDER BY ", " LIMIT "])
            .map(parse_conditions)
            .unwrap_or_default();
        let mut rows: Vec<&Vec<FieldValue>> = table
            .rows
            .iter()
            .filter(|row| conditions.iter().all(|c| c.matches(row, params)))
            .collect();

        if let Some(order_by) = between(sql, " ORDER BY ", &[" LIMIT "])
            .and_then(|clause| quoted_identifiers(clause).into_iter().next())
        {
            rows.sort_by(|a, b| {
                value_of(a, &order_by)
                    .compare(value_of(b, &order_by))
                    .unwrap_or(Ordering::Equal)
            });
        }
        if let Some(limit) = between(sql, " LIMIT ", &[]).and_then(|l| l.trim().parse().ok()) {
            rows.truncate(limit);
        }

        Ok(rows
            .into_iter()
            .map(|row| RowData::new(&table_name, row.clone()))
            .collect())
    }

    fn apply(
        tables: &mut BTreeMap<String, FakeTable>,
        sql: &str,
        params: &[Value],
    ) -> Result<u64, DbError> {
        let idents = quoted_identifiers(sql);
        let table_name = idents.first().cloned().unwrap_or_default();
        let table = tables
            .get_mut(&table_name)
            .ok_or_else(|| DbError::TableNotFound(table_name.clone()))?;

        if sql.starts_with("INSERT") {
            let head = between(sql, "INSERT INTO ", &[" VALUES "]).unwrap_or_default();
            let columns: Vec<String> = quoted_identifiers(head).into_iter().skip(1).collect();
            let conflict = between(sql, " ON CONFLICT ", &[]);
            let keys = match conflict {
                Some(clause) => between(clause, "(", &[")"])
                    .map(quoted_identifiers)
                    .unwrap_or_default(),
                None => table.key_columns(),
            };
            let updates: Vec<String> = conflict
                .and_then(|clause| between(clause, "DO UPDATE SET ", &[]))
                .map(quoted_identifiers)
                .map(|mut idents| {
                    idents.dedup();
                    idents
                })
                .unwrap_or_default();

            let mut written = 0;
            for values in params.chunks(columns.len().max(1)) {
                let incoming: Vec<FieldValue> = columns
                    .iter()
                    .zip(values)
                    .map(|(name, value)| FieldValue {
                        name: name.clone(),
                        value: value.clone(),
                    })
                    .collect();
                let existing = (!keys.is_empty())
                    .then(|| {
                        table.rows.iter_mut().find(|row| {
                            keys.iter()
                                .all(|k| same_value(value_of(row, k), value_of(&incoming, k)))
                        })
                    })
                    .flatten();
                match (existing, conflict) {
                    (Some(row), Some(_)) => {
                        for field in row.iter_mut().filter(|f| updates.contains(&f.name)) {
                            field.value = value_of(&incoming, &field.name).clone();
                        }
                    }
                    (Some(_), None) => return Err(fake_error(&table_name, "duplicate key")),
                    (None, _) => {
                        let row = table
                            .metadata
                            .columns
                            .iter()
                            .map(|c| FieldValue {
                                name: c.name.clone(),
                                value: value_of(&incoming, &c.name).clone(),
                            })
                            .collect();
                        table.rows.push(row);
                    }
                }
                written += 1;
            }
            return Ok(written);
        }

        let conditions = between(sql, " WHERE ", &[])
            .map(parse_conditions)
            .unwrap_or_default();

        if sql.starts_with("UPDATE") {
            let assignments = between(sql, " SET ", &[" WHERE "])
                .map(parse_conditions_list)
                .unwrap_or_default();
            let mut written = 0;
            for row in table
                .rows
                .iter_mut()
                .filter(|row| conditions.iter().all(|c| c.matches(row, params)))
            {
                for assignment in &assignments {
                    if let Some(field) = row.iter_mut().find(|f| f.name == assignment.column) {
                        field.value = params.get(assignment.param).cloned().unwrap_or(Value::Null);
                    }
                }
                written += 1;
            }
            return Ok(written);
        }

        if sql.starts_with("DELETE") {
            let before = table.rows.len();
            table
                .rows
                .retain(|row| !conditions.iter().all(|c| c.matches(row, params)));
            return Ok((before - table.rows.len()) as u64);
        }

        Err(fake_error(&table_name, "unsupported statement"))
    }
}

/// `"a" = $1, "b" = $2`
fn parse_conditions_list(clause: &str) -> Vec<Condition> {
    clause
        .split(", ")
        .flat_map(parse_conditions)
        .collect()
}

#[async_trait]
impl Connection for FakeDatabase {
    async fn query(
        &self,
        _table: &str,
        sql: &str,
        params: &[Value],
    ) -> Result<Vec<RowData>, DbError> {
        self.statements.lock().unwrap().push(sql.to_string());
        self.check_read_failure()?;
        let rows = self.select(sql, params)?;
        self.rows_read.fetch_add(rows.len(), AtomicOrdering::SeqCst);
        Ok(rows)
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, DbError> {
        self.execute_batch(&[BoundStatement::new(sql, params.to_vec())])
            .await
    }

    async fn execute_batch(&self, statements: &[BoundStatement]) -> Result<u64, DbError> {
        self.statements
            .lock()
            .unwrap()
            .extend(statements.iter().map(|s| s.sql.clone()));
        if self
            .write_failures
            .fetch_update(AtomicOrdering::SeqCst, AtomicOrdering::SeqCst, |n| {
                n.checked_sub(1)
            })
            .is_ok()
        {
            return Err(transient_error());
        }

        let mut tables = self.tables.lock().unwrap();
        let mut staged = tables.clone();
        let mut written = 0;
        for statement in statements {
            written += Self::apply(&mut staged, &statement.sql, &statement.params)?;
        }
        *tables = staged;
        drop(tables);
        self.after_write();
        Ok(written)
    }
}

#[async_trait]
impl MetadataLoader for FakeDatabase {
    async fn load(&self, table: &str) -> Result<Arc<TableMetaData>, DbError> {
        self.metadata_loads.fetch_add(1, AtomicOrdering::SeqCst);
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .map(|t| Arc::new(t.metadata.clone()))
            .ok_or_else(|| DbError::TableNotFound(table.to_string()))
    }
}

/// Change stream replaying a fixed list of events. Once the list is
/// exhausted it stays idle unless it ends with `Finished`.
pub struct ScriptedSource {
    events: VecDeque<ChangeEvent>,
}

#[async_trait]
impl ChangeEventSource for ScriptedSource {
    async fn poll(&mut self) -> Result<Option<ChangeEvent>, DbError> {
        Ok(self.events.pop_front())
    }
}

impl ScriptedSource {
    pub fn new(events: Vec<ChangeEvent>) -> Self {
        Self {
            events: events.into(),
        }
    }
}

/// Per data source scripts. Opening at a stream position skips every event
/// up to and including that position.
#[derive(Default)]
pub struct ScriptedChangeSources {
    scripts: Mutex<HashMap<String, Vec<ChangeEvent>>>,
    opened: Mutex<Vec<(String, Position)>>,
}

impl ScriptedChangeSources {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, data_source: &str, events: Vec<ChangeEvent>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(data_source.to_string(), events);
    }

    pub fn opened(&self) -> Vec<(String, Position)> {
        self.opened.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChangeEventSourceFactory for ScriptedChangeSources {
    async fn open(
        &self,
        data_source: &str,
        position: &Position,
    ) -> Result<Box<dyn ChangeEventSource>, DbError> {
        self.opened
            .lock()
            .unwrap()
            .push((data_source.to_string(), position.clone()));
        let events = self
            .scripts
            .lock()
            .unwrap()
            .get(data_source)
            .cloned()
            .unwrap_or_default();
        let skip = match position {
            Position::Stream { .. } => events
                .iter()
                .position(|e| matches!(e, ChangeEvent::Record(r) if r.position() == position))
                .map_or(0, |i| i + 1),
            _ => 0,
        };
        Ok(Box::new(ScriptedSource::new(
            events.into_iter().skip(skip).collect(),
        )))
    }
}

#[derive(Default, Clone)]
pub struct FakeConnections {
    databases: HashMap<String, Arc<FakeDatabase>>,
}

impl FakeConnections {
    pub fn with(mut self, name: &str, database: &Arc<FakeDatabase>) -> Self {
        self.databases.insert(name.to_string(), Arc::clone(database));
        self
    }
}

#[async_trait]
impl ConnectionFactory for FakeConnections {
    async fn get_connection(
        &self,
        data_source: &str,
    ) -> Result<Arc<dyn Connection>, ConnectorError> {
        self.databases
            .get(data_source)
            .map(|db| Arc::clone(db) as Arc<dyn Connection>)
            .ok_or_else(|| ConnectorError::UnknownDataSource(data_source.to_string()))
    }
}

pub struct FakeCollaborators {
    pub connections: FakeConnections,
    pub change_sources: Arc<ScriptedChangeSources>,
}

impl Collaborators for FakeCollaborators {
    fn connection_factory(&self, _config: &JobConfiguration) -> Arc<dyn ConnectionFactory> {
        Arc::new(self.connections.clone())
    }

    fn metadata_loader(
        &self,
        data_source: &DataSourceConfig,
        _connection: Arc<dyn Connection>,
    ) -> Arc<dyn MetadataLoader> {
        let db = self
            .connections
            .databases
            .get(&data_source.name)
            .cloned()
            .unwrap_or_else(FakeDatabase::new);
        db as Arc<dyn MetadataLoader>
    }

    fn change_sources(&self, _config: &JobConfiguration) -> Arc<dyn ChangeEventSourceFactory> {
        Arc::clone(&self.change_sources) as Arc<dyn ChangeEventSourceFactory>
    }
}

pub fn column(ordinal: usize, name: &str, data_type: DataType, primary_key: bool) -> ColumnMetaData {
    ColumnMetaData {
        ordinal,
        name: name.to_string(),
        data_type,
        nullable: !primary_key,
        primary_key,
        unique_key: primary_key,
    }
}

/// `order_id BIGINT PRIMARY KEY, user_id INT, status VARCHAR`
pub fn orders_table(name: &str) -> TableMetaData {
    TableMetaData::new(
        name,
        vec![
            column(1, "order_id", DataType::BigInt, true),
            column(2, "user_id", DataType::Int, false),
            column(3, "status", DataType::VarChar, false),
        ],
        vec![],
    )
}

pub fn order_row(order_id: i64) -> Vec<(&'static str, Value)> {
    vec![
        ("order_id", Value::Int(order_id)),
        ("user_id", Value::Int(order_id % 3)),
        ("status", Value::String(format!("status-{order_id}"))),
    ]
}

pub fn database_with_orders(table: &str, ids: impl IntoIterator<Item = i64>) -> Arc<FakeDatabase> {
    let db = FakeDatabase::new();
    db.create_table(orders_table(table));
    for id in ids {
        db.insert_row(table, order_row(id));
    }
    db
}

pub fn order_ids(db: &FakeDatabase, table: &str) -> Vec<i64> {
    db.rows(table, "order_id")
        .iter()
        .filter_map(|r| r.get_value("order_id").as_i64())
        .collect()
}

pub fn stream_position(n: u64) -> Position {
    Position::stream(format!("binlog.000001:{n:08}"))
}

pub fn insert_event(table: &str, n: u64, order_id: i64, status: &str) -> ChangeEvent {
    ChangeEvent::Record(DataRecord::new(
        ChangeType::Insert,
        table,
        stream_position(n),
        vec![
            Column::new("order_id", Value::Int(order_id), true, true),
            Column::new("user_id", Value::Int(order_id % 3), true, false),
            Column::new("status", Value::from(status), true, false),
        ],
    ))
}

pub fn status_update_event(table: &str, n: u64, order_id: i64, old: &str, new: &str) -> ChangeEvent {
    ChangeEvent::Record(DataRecord::new(
        ChangeType::Update,
        table,
        stream_position(n),
        vec![
            Column::changed("order_id", Value::Int(order_id), Value::Int(order_id), true),
            Column::changed("status", Value::from(old), Value::from(new), false),
        ],
    ))
}

pub fn delete_event(table: &str, n: u64, order_id: i64) -> ChangeEvent {
    ChangeEvent::Record(DataRecord::new(
        ChangeType::Delete,
        table,
        stream_position(n),
        vec![Column::deleted("order_id", Value::Int(order_id), true)],
    ))
}

pub fn job_json(sources: &[&str], tables: &str, extra: &str) -> String {
    let sources: Vec<String> = sources
        .iter()
        .map(|name| {
            format!(r#"{{"name": "{name}", "database_type": "{POSTGRES}", "url": "postgres://fake/{name}"}}"#)
        })
        .collect();
    format!(
        r#"{{
            "job_id": "job-test",
            "sources": [{}],
            "target": {{"name": "target", "database_type": "{POSTGRES}", "url": "postgres://fake/target"}},
            "tables": {tables}
            {extra}
        }}"#,
        sources.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_identifiers_and_conditions() {
        let sql = r#"SELECT * FROM "t_order" WHERE "order_id" > $1 AND "order_id" <= $2 ORDER BY "order_id" ASC LIMIT 10"#;
        assert_eq!(quoted_identifiers(sql)[0], "t_order");
        let conditions = between(sql, " WHERE ", &[" ORDER BY "])
            .map(parse_conditions)
            .unwrap();
        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions[0].op, ">");
        assert_eq!(conditions[1].param, 1);
    }

    #[tokio::test]
    async fn upsert_update_and_delete_round_trip() {
        let db = database_with_orders("t_order", [1]);
        let upsert = r#"INSERT INTO "t_order" ("order_id", "user_id", "status") VALUES ($1, $2, $3), ($4, $5, $6) ON CONFLICT ("order_id") DO UPDATE SET "user_id" = EXCLUDED."user_id", "status" = EXCLUDED."status""#;
        let params = vec![
            Value::Int(1),
            Value::Int(7),
            Value::from("PAID"),
            Value::Int(2),
            Value::Int(8),
            Value::from("NEW"),
        ];
        assert_eq!(db.execute(upsert, &params).await.unwrap(), 2);
        assert_eq!(order_ids(&db, "t_order"), vec![1, 2]);
        assert_eq!(db.rows("t_order", "order_id")[0].get_value("status"), Value::from("PAID"));

        let update = r#"UPDATE "t_order" SET "order_id" = $1 WHERE "order_id" = $2"#;
        db.execute(update, &[Value::Int(5), Value::Int(2)]).await.unwrap();
        let delete = r#"DELETE FROM "t_order" WHERE "order_id" = $1"#;
        db.execute(delete, &[Value::Int(1)]).await.unwrap();
        assert_eq!(order_ids(&db, "t_order"), vec![5]);
    }
}
