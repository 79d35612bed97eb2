//! Mutable datasets and warehouses (spec §4.8).
//!
//! Specific database drivers stay out of scope here exactly as they do
//! in [crate::sql] — this module decides which DDL/DML text to run and
//! when, and hands the actual execution to a caller-supplied
//! [SQLConnection]. The one piece of genuinely new machinery is the
//! import pipeline's fallback: pulling a non-SQL source stream and
//! replaying it as batched `INSERT`s, serialised against a concurrent
//! [crate::concurrency::StreamPuller] via a plain mutex.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::concurrency::{Job, Source, StreamPuller};
use crate::dataset::{Dataset, StreamDataset};
use crate::error::{Error, Fallible, Reason};
use crate::sql::{Dialect, SQLDataset, SQLDialect};
use crate::stream::FetchStatus;
use crate::value::{Column, OrderedSet, Row, Schema, Value};

/// The mutation kinds a [MutableDataset] may support. Checked up front
/// by [MutableDataset::can_perform_mutation] — a kind that fails this
/// gate must never reach the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatasetMutationKind {
    Truncate,
    Drop,
    Insert,
    Import,
    Alter,
    Rename,
    Update,
    Delete,
}

/// The identifier columns' values for one row, in schema order —
/// enough to address a row without carrying its whole contents.
pub type Key = Vec<(Column, Value)>;

/// A single mutation to apply to a [MutableDataset] (spec §4.8).
pub enum DatasetMutation {
    Truncate,
    Drop,
    Insert(Row),
    /// Pulls `source` and writes it here, mapping `target -> source`
    /// column names.
    Import {
        source: Arc<dyn Dataset>,
        mapping: Vec<(Column, Column)>,
    },
    /// Replaces the schema. Refused outright if it would change the
    /// identifier key — that is explicitly out of scope (spec §4.8).
    Alter(Schema),
    Rename(Vec<(Column, Column)>),
    Update {
        key: Key,
        column: Column,
        old: Value,
        new: Value,
    },
    Delete(Vec<Key>),
}

impl DatasetMutation {
    pub fn kind(&self) -> DatasetMutationKind {
        match self {
            DatasetMutation::Truncate => DatasetMutationKind::Truncate,
            DatasetMutation::Drop => DatasetMutationKind::Drop,
            DatasetMutation::Insert(_) => DatasetMutationKind::Insert,
            DatasetMutation::Import { .. } => DatasetMutationKind::Import,
            DatasetMutation::Alter(_) => DatasetMutationKind::Alter,
            DatasetMutation::Rename(_) => DatasetMutationKind::Rename,
            DatasetMutation::Update { .. } => DatasetMutationKind::Update,
            DatasetMutation::Delete(_) => DatasetMutationKind::Delete,
        }
    }
}

/// A connection capable of running DDL/DML text — the `SQLConnection.run`
/// suspension point named in spec §5. Concrete drivers are out of
/// scope; this crate only ever decides what to hand it.
pub trait SQLConnection: Send + Sync {
    fn run(&self, sql: &str) -> Fallible<()>;
}

/// The operator surface a mutable backing store implements (spec
/// §4.8). `mutate` still refuses anything `can_perform_mutation`
/// can't see in advance — an `Alter` that would change the identifier
/// key, for instance.
pub trait MutableDataset: Send + Sync {
    fn can_perform_mutation(&self, kind: DatasetMutationKind) -> bool;
    fn mutate(&self, job: &Job, mutation: DatasetMutation) -> Fallible<()>;
}

const IMPORT_BATCH_SIZE: usize = 500;

/// A [MutableDataset] backed by a single SQL table, reached through a
/// caller-supplied [SQLConnection].
pub struct SQLMutableDataset {
    dialect: Dialect,
    table: String,
    schema: Mutex<Schema>,
    connection: Arc<dyn SQLConnection>,
}

impl SQLMutableDataset {
    pub fn new(dialect: Dialect, table: impl Into<String>, schema: Schema, connection: Arc<dyn SQLConnection>) -> SQLMutableDataset {
        SQLMutableDataset { dialect, table: table.into(), schema: Mutex::new(schema), connection }
    }

    pub fn schema(&self) -> Schema {
        self.schema.lock().clone()
    }

    fn quoted_table(&self) -> String {
        self.dialect.handler().quote_identifier_path(&[&self.table])
    }

    fn quoted_column(&self, column: &Column) -> String {
        self.dialect.handler().quote_identifier_path(&[column.as_str()])
    }

    fn where_clause_for_key(&self, key: &[(Column, Value)]) -> String {
        let handler = self.dialect.handler();
        key.iter()
            .map(|(col, value)| format!("{} = {}", self.quoted_column(col), handler.value_to_sql(value)))
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    fn insert_statement(&self, columns: &[Column], rows: &[Vec<Value>]) -> String {
        let handler = self.dialect.handler();
        let column_list = columns.iter().map(|c| self.quoted_column(c)).collect::<Vec<_>>().join(", ");
        let value_rows: Vec<String> = rows
            .iter()
            .map(|row| {
                let values = row.iter().map(|v| handler.value_to_sql(v)).collect::<Vec<_>>().join(", ");
                format!("({values})")
            })
            .collect();
        format!("INSERT INTO {} ({column_list}) VALUES {}", self.quoted_table(), value_rows.join(", "))
    }

    /// Import pipeline (spec §4.8): a same-dialect [SQLDataset] source
    /// collapses to a single `INSERT ... SELECT`; anything else is
    /// pulled and replayed as batched `INSERT`s.
    fn import(&self, job: &Job, source: Arc<dyn Dataset>, mapping: Vec<(Column, Column)>) -> Fallible<()> {
        if let Some(sql_source) = source.as_any().downcast_ref::<SQLDataset>() {
            if sql_source.dialect() == self.dialect {
                if let Some(select) = sql_source.sql() {
                    let target_cols = mapping.iter().map(|(target, _)| self.quoted_column(target)).collect::<Vec<_>>().join(", ");
                    let source_cols = mapping
                        .iter()
                        .map(|(_, source_col)| self.dialect.handler().quote_identifier_path(&[source_col.as_str()]))
                        .collect::<Vec<_>>()
                        .join(", ");
                    let sql = format!(
                        "INSERT INTO {} ({target_cols}) SELECT {source_cols} FROM ({select}) AS import_source",
                        self.quoted_table()
                    );
                    return self.connection.run(&sql);
                }
            }
        }
        self.import_via_stream(job, source, mapping)
    }

    fn import_via_stream(&self, job: &Job, source: Arc<dyn Dataset>, mapping: Vec<(Column, Column)>) -> Fallible<()> {
        let target_columns: Vec<Column> = mapping.iter().map(|(target, _)| target.clone()).collect();
        let source_columns: Vec<Column> = mapping.iter().map(|(_, source_col)| source_col.clone()).collect();

        let stream_source = Arc::new(ImportBatchSource {
            stream: source.stream(),
            job: job.clone(),
            exhausted: AtomicBool::new(false),
        });
        let puller = StreamPuller::for_host(job.clone());

        // Serialises the actual writes: `pull`'s delivery order is
        // guaranteed per-item, but two deliveries can still be running
        // concurrently on different worker threads (spec §5's
        // "suspension points", and §4.8's "serialising per-batch via a
        // mutex owned by the puller").
        let write_lock = Arc::new(Mutex::new(()));
        let failure: Arc<Mutex<Option<anyhow::Error>>> = Arc::new(Mutex::new(None));

        let connection = self.connection.clone();
        let quoted_table = self.quoted_table();
        let target_list = target_columns.iter().map(|c| self.quoted_column(c)).collect::<Vec<_>>().join(", ");
        let dialect = self.dialect;
        let source_columns_for_item = source_columns.clone();
        let write_lock_for_item = write_lock.clone();
        let failure_for_item = failure.clone();

        let (tx, rx) = std::sync::mpsc::channel();
        let tx_error = tx.clone();
        let failure_for_error = failure.clone();

        puller.pull(
            stream_source,
            move |batch: Vec<Row>| {
                if failure_for_item.lock().is_some() {
                    return;
                }
                let handler = dialect.handler();
                for chunk in batch.chunks(IMPORT_BATCH_SIZE) {
                    let value_rows: Vec<String> = chunk
                        .iter()
                        .map(|row| {
                            let values = source_columns_for_item
                                .iter()
                                .map(|c| handler.value_to_sql(row.get(c)))
                                .collect::<Vec<_>>()
                                .join(", ");
                            format!("({values})")
                        })
                        .collect();
                    if value_rows.is_empty() {
                        continue;
                    }
                    let sql = format!("INSERT INTO {quoted_table} ({target_list}) VALUES {}", value_rows.join(", "));
                    let guard = write_lock_for_item.lock();
                    let result = connection.run(&sql);
                    drop(guard);
                    if let Err(err) = result {
                        *failure_for_item.lock() = Some(err);
                        return;
                    }
                }
            },
            move || {
                let _ = tx.send(());
            },
            move |err: anyhow::Error| {
                *failure_for_error.lock() = Some(err);
                let _ = tx_error.send(());
            },
        );

        rx.recv().map_err(|_| anyhow::anyhow!("import ended without a result"))?;
        if let Some(err) = failure.lock().take() {
            return Err(err);
        }
        Ok(())
    }

    /// Alter pipeline (spec §4.8): diffs the column sets into ADD/DROP
    /// COLUMN clauses. Refuses an identifier-key change outright —
    /// that is out of scope regardless of dialect support.
    fn alter(&self, new_schema: Schema) -> Fallible<()> {
        let mut schema = self.schema.lock();
        if new_schema.identifier() != schema.identifier() {
            return Err(anyhow::anyhow!("changing the identifier key is not supported"));
        }
        let handler = self.dialect.handler();
        let added: Vec<Column> = new_schema.columns().iter().filter(|c| !schema.contains(c)).cloned().collect();
        let removed: Vec<Column> = schema.columns().iter().filter(|c| !new_schema.contains(c)).cloned().collect();

        for column in &added {
            let sql = format!("ALTER TABLE {} ADD COLUMN {}", self.quoted_table(), self.quoted_column(column));
            self.connection.run(&sql)?;
        }
        if handler.supports_drop_column() {
            for column in &removed {
                let sql = format!("ALTER TABLE {} DROP COLUMN {}", self.quoted_table(), self.quoted_column(column));
                self.connection.run(&sql)?;
            }
        }
        *schema = new_schema;
        Ok(())
    }

    fn rename(&self, mapping: Vec<(Column, Column)>) -> Fallible<()> {
        {
            let schema = self.schema.lock();
            for (from, _) in &mapping {
                if !schema.contains(from) {
                    return Err(Error::new(Reason::NotFound {
                        name: from.as_str().to_string(),
                        namespace: "column".to_string(),
                    })
                    .into());
                }
            }
        }
        for (from, to) in &mapping {
            let sql = format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {}",
                self.quoted_table(),
                self.quoted_column(from),
                self.quoted_column(to)
            );
            self.connection.run(&sql)?;
        }
        let mut schema = self.schema.lock();
        for (from, to) in mapping {
            if schema.remove_column(&from) {
                schema.add_column(to);
            }
        }
        Ok(())
    }
}

impl MutableDataset for SQLMutableDataset {
    fn can_perform_mutation(&self, kind: DatasetMutationKind) -> bool {
        match kind {
            DatasetMutationKind::Alter | DatasetMutationKind::Rename => {
                let handler = self.dialect.handler();
                handler.supports_drop_column() && handler.supports_alter_column_type()
            }
            _ => true,
        }
    }

    fn mutate(&self, job: &Job, mutation: DatasetMutation) -> Fallible<()> {
        let kind = mutation.kind();
        if !self.can_perform_mutation(kind) {
            return Err(anyhow::anyhow!("{:?} is not supported by the {:?} dialect", kind, self.dialect));
        }
        log::debug!("executing {kind:?} against {}", self.table);
        match mutation {
            DatasetMutation::Truncate => self.connection.run(&format!("TRUNCATE TABLE {}", self.quoted_table())),
            DatasetMutation::Drop => self.connection.run(&format!("DROP TABLE {}", self.quoted_table())),
            DatasetMutation::Insert(row) => {
                let columns: Vec<Column> = row.columns().iter().cloned().collect();
                self.connection.run(&self.insert_statement(&columns, &[row.values().to_vec()]))
            }
            DatasetMutation::Import { source, mapping } => self.import(job, source, mapping),
            DatasetMutation::Alter(new_schema) => self.alter(new_schema),
            DatasetMutation::Rename(mapping) => self.rename(mapping),
            DatasetMutation::Update { key, column, old, new } => {
                let handler = self.dialect.handler();
                let where_clause = self.where_clause_for_key(&key);
                let sql = format!(
                    "UPDATE {} SET {} = {} WHERE {where_clause} AND {} = {}",
                    self.quoted_table(),
                    self.quoted_column(&column),
                    handler.value_to_sql(&new),
                    self.quoted_column(&column),
                    handler.value_to_sql(&old),
                );
                self.connection.run(&sql)
            }
            DatasetMutation::Delete(keys) => {
                for key in &keys {
                    let sql = format!("DELETE FROM {} WHERE {}", self.quoted_table(), self.where_clause_for_key(key));
                    self.connection.run(&sql)?;
                }
                Ok(())
            }
        }
    }
}

/// Bridges a [Dataset]'s stream into the [Source] contract
/// [StreamPuller] drives, same shape as [crate::dataset]'s internal
/// `FetchSource`.
struct ImportBatchSource {
    stream: Box<dyn crate::stream::Stream>,
    job: Job,
    exhausted: AtomicBool,
}

impl Source<Vec<Row>, anyhow::Error> for ImportBatchSource {
    fn fetch(&self) -> Result<Option<Vec<Row>>, anyhow::Error> {
        if self.exhausted.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let (rows, status) = self.stream.fetch(&self.job)?;
        if status == FetchStatus::Finished {
            self.exhausted.store(true, Ordering::SeqCst);
        }
        if rows.is_empty() && status == FetchStatus::Finished {
            Ok(None)
        } else {
            Ok(Some(rows))
        }
    }
}

/// Builds a [Dataset] from a CSV reader: header row becomes the
/// column set, every field becomes a [Value::String] (the usual
/// numeric-then-string fallback in [crate::value] handles comparisons
/// against typed literals downstream). Grounded on the teacher's
/// integration-test `import_csv` helper, generalised from a
/// one-off test fixture loader into a reusable [Dataset] source.
pub fn csv_source<R: std::io::Read>(reader: R) -> Fallible<StreamDataset> {
    let mut csv_reader = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
    let columns: OrderedSet<Column> =
        csv_reader.headers()?.iter().map(Column::new).collect();
    let shared = Arc::new(columns.clone());

    let mut rows = Vec::new();
    for record in csv_reader.records() {
        let record = record?;
        let values: Vec<Value> = record.iter().map(|field| Value::String(field.to_string())).collect();
        rows.push(Row::new(shared.clone(), values));
    }
    Ok(StreamDataset::from_rows(columns, rows))
}

/// A warehouse: a place `Warehouse::create` can stand up a new table
/// in, wrapped in a transaction (spec §4.8).
pub struct SQLWarehouse {
    dialect: Dialect,
    connection: Arc<dyn SQLConnection>,
}

impl SQLWarehouse {
    pub fn new(dialect: Dialect, connection: Arc<dyn SQLConnection>) -> SQLWarehouse {
        SQLWarehouse { dialect, connection }
    }

    /// Creates `name` with `schema`'s columns, then imports `data`,
    /// all inside a single `BEGIN`/`COMMIT`. Rolls back at the first
    /// failure in either step and does not retry (spec §7).
    pub fn create(&self, job: &Job, name: &str, schema: Schema, data: Arc<dyn Dataset>) -> Fallible<SQLMutableDataset> {
        let handler = self.dialect.handler();
        let column_defs = schema
            .columns()
            .iter()
            .map(|c| format!("{} TEXT", handler.quote_identifier_path(&[c.as_str()])))
            .collect::<Vec<_>>()
            .join(", ");
        let quoted_table = handler.quote_identifier_path(&[name]);

        self.connection.run("BEGIN")?;
        if let Err(err) = self.connection.run(&format!("CREATE TABLE {quoted_table} ({column_defs})")) {
            log::debug!("warehouse create rolled back: {err}");
            let _ = self.connection.run("ROLLBACK");
            return Err(err);
        }

        let mutable = SQLMutableDataset::new(self.dialect, name, schema.clone(), self.connection.clone());
        let mapping = schema.columns().iter().map(|c| (c.clone(), c.clone())).collect();
        if let Err(err) = mutable.import(job, data, mapping) {
            log::debug!("warehouse create rolled back: {err}");
            let _ = self.connection.run("ROLLBACK");
            return Err(err);
        }

        self.connection.run("COMMIT")?;
        Ok(mutable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;

    struct RecordingConnection {
        statements: Mutex<Vec<String>>,
        fail_on: Option<String>,
    }

    impl RecordingConnection {
        fn new() -> RecordingConnection {
            RecordingConnection { statements: Mutex::new(Vec::new()), fail_on: None }
        }
    }

    impl SQLConnection for RecordingConnection {
        fn run(&self, sql: &str) -> Fallible<()> {
            if let Some(needle) = &self.fail_on {
                if sql.contains(needle.as_str()) {
                    return Err(anyhow::anyhow!("simulated failure"));
                }
            }
            self.statements.lock().push(sql.to_string());
            Ok(())
        }
    }

    fn schema(columns: &[&str]) -> Schema {
        Schema::new(columns.iter().map(|c| Column::new(*c)).collect())
    }

    #[test]
    fn insert_builds_a_values_statement() {
        let conn = Arc::new(RecordingConnection::new());
        let mutable = SQLMutableDataset::new(Dialect::Generic, "accounts", schema(&["id", "balance"]), conn.clone());
        let cols: OrderedSet<Column> = ["id", "balance"].iter().map(|c| Column::new(*c)).collect();
        let row = Row::new(StdArc::new(cols), vec![Value::Int(1), Value::Int(100)]);
        let job = Job::root();
        mutable.mutate(&job, DatasetMutation::Insert(row)).unwrap();
        let statements = conn.statements.lock();
        assert_eq!(statements.len(), 1);
        assert!(statements[0].starts_with("INSERT INTO"));
        assert!(statements[0].contains("VALUES (1, 100)"));
    }

    #[test]
    fn alter_refuses_identifier_key_change() {
        let conn = Arc::new(RecordingConnection::new());
        let mut base = schema(&["id", "name"]);
        base.set_identifier([Column::new("id")].into_iter().collect());
        let mutable = SQLMutableDataset::new(Dialect::Generic, "t", base, conn);

        let mut changed = schema(&["id", "name"]);
        changed.set_identifier([Column::new("name")].into_iter().collect());
        let job = Job::root();
        let result = mutable.mutate(&job, DatasetMutation::Alter(changed));
        assert!(result.is_err());
    }

    #[test]
    fn alter_is_refused_outright_on_a_dialect_without_drop_support() {
        let conn = Arc::new(RecordingConnection::new());
        let mutable = SQLMutableDataset::new(Dialect::SQLite, "t", schema(&["a"]), conn);
        assert!(!mutable.can_perform_mutation(DatasetMutationKind::Alter));
        let job = Job::root();
        let result = mutable.mutate(&job, DatasetMutation::Alter(schema(&["a", "b"])));
        assert!(result.is_err());
    }

    #[test]
    fn rename_refuses_an_unknown_source_column() {
        let conn = Arc::new(RecordingConnection::new());
        let mutable = SQLMutableDataset::new(Dialect::Generic, "t", schema(&["a", "b"]), conn.clone());
        let job = Job::root();
        let result = mutable.mutate(&job, DatasetMutation::Rename(vec![(Column::new("missing"), Column::new("renamed"))]));
        assert!(result.is_err());
        assert!(conn.statements.lock().is_empty());
    }

    #[test]
    fn rename_updates_the_schema_and_issues_alter_statements() {
        let conn = Arc::new(RecordingConnection::new());
        let mutable = SQLMutableDataset::new(Dialect::Generic, "t", schema(&["a", "b"]), conn.clone());
        let job = Job::root();
        mutable.mutate(&job, DatasetMutation::Rename(vec![(Column::new("a"), Column::new("renamed"))])).unwrap();
        let statements = conn.statements.lock();
        assert_eq!(statements.len(), 1);
        assert!(statements[0].contains("RENAME COLUMN"));
    }

    #[test]
    fn import_from_a_stream_source_batches_inserts() {
        let conn = Arc::new(RecordingConnection::new());
        let mutable = SQLMutableDataset::new(Dialect::Generic, "dest", schema(&["x"]), conn.clone());
        let source_cols: OrderedSet<Column> = ["x"].iter().map(|c| Column::new(*c)).collect();
        let rows = vec![
            Row::new(StdArc::new(source_cols.clone()), vec![Value::Int(1)]),
            Row::new(StdArc::new(source_cols.clone()), vec![Value::Int(2)]),
        ];
        let source: Arc<dyn Dataset> = Arc::new(StreamDataset::from_rows(source_cols, rows));
        let job = Job::root();
        mutable
            .mutate(&job, DatasetMutation::Import { source, mapping: vec![(Column::new("x"), Column::new("x"))] })
            .unwrap();
        let statements = conn.statements.lock();
        assert_eq!(statements.len(), 1);
        assert!(statements[0].contains("VALUES (1), (2)"));
    }

    #[test]
    fn warehouse_create_wraps_in_a_transaction() {
        let conn = Arc::new(RecordingConnection::new());
        let warehouse = SQLWarehouse::new(Dialect::Generic, conn.clone());
        let dest_schema = schema(&["x"]);
        let source_cols: OrderedSet<Column> = ["x"].iter().map(|c| Column::new(*c)).collect();
        let source: Arc<dyn Dataset> =
            Arc::new(StreamDataset::from_rows(source_cols.clone(), vec![Row::new(StdArc::new(source_cols), vec![Value::Int(1)])]));
        let job = Job::root();
        warehouse.create(&job, "new_table", dest_schema, source).unwrap();
        let statements = conn.statements.lock();
        assert_eq!(statements.first().unwrap(), "BEGIN");
        assert!(statements.iter().any(|s| s.starts_with("CREATE TABLE")));
        assert_eq!(statements.last().unwrap(), "COMMIT");
    }

    #[test]
    fn warehouse_create_rolls_back_on_failure() {
        let conn = Arc::new(RecordingConnection { statements: Mutex::new(Vec::new()), fail_on: Some("CREATE TABLE".to_string()) });
        let warehouse = SQLWarehouse::new(Dialect::Generic, conn.clone());
        let source: Arc<dyn Dataset> = Arc::new(StreamDataset::from_rows(OrderedSet::new(), Vec::new()));
        let job = Job::root();
        let result = warehouse.create(&job, "new_table", schema(&["x"]), source);
        assert!(result.is_err());
        let statements = conn.statements.lock();
        assert_eq!(statements.as_slice(), ["BEGIN", "ROLLBACK"]);
    }

    #[test]
    fn csv_source_reads_headers_and_rows() {
        let csv = "id,name\n1,ada\n2,grace\n";
        let dataset = csv_source(csv.as_bytes()).unwrap();
        let job = Job::root();
        let raster = dataset.raster(&job).unwrap();
        assert_eq!(raster.rows().len(), 2);
        assert_eq!(raster.rows()[0].get(&Column::new("name")), &Value::String("ada".to_string()));
    }
}
