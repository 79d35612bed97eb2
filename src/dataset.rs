//! [Dataset]: the operator surface every concrete table-like thing in
//! the crate implements (spec §6) — `StreamDataset` composes the
//! transformers in [crate::stream] lazily; operators that need the
//! whole table at once (`distinct`, `sort`, `transpose`, `pivot`) fall
//! back to materialising into a [Raster] on first pull.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::concurrency::{Job, Source, StreamPuller};
use crate::error::Fallible;
use crate::expr::{Aggregator, Expr};
use crate::raster::{Order, Raster};
use crate::stream::{self, FetchStatus, Join, JoinKind, JoinSource, RowSource, Stream};
use crate::value::{Column, OrderedSet, Row};

/// A row count plus schema, the result of [Dataset::describe] — not
/// part of the distilled operator surface, added so a caller can
/// cheaply report "what is this dataset" without pulling every row
/// into application code first.
#[derive(Debug, Clone)]
pub struct DatasetSummary {
    pub columns: OrderedSet<Column>,
    pub row_count: usize,
}

/// Controls how [crate::sql::SQLDataset::sql_with] renders its
/// generated query text — generalised from the teacher's
/// `sql::Options`/`Target` pair, minus the `target` field (this
/// crate's dialect already lives on `SQLDataset` itself).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// Pass the generated SQL through `sqlformat` before returning it.
    /// Defaults to true.
    pub format: bool,
    /// Append a trailing `-- Generated by ...` comment naming the
    /// dialect. Defaults to true.
    pub signature_comment: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options { format: true, signature_comment: true }
    }
}

impl Options {
    pub fn with_format(mut self, format: bool) -> Self {
        self.format = format;
        self
    }

    pub fn with_signature_comment(mut self, signature_comment: bool) -> Self {
        self.signature_comment = signature_comment;
        self
    }
}

/// Every operator returns a new Dataset rather than mutating `self`;
/// materialisation only happens when [Dataset::raster] or a consumer
/// of [Dataset::stream] actually pulls.
pub trait Dataset: Send + Sync + 'static {
    /// Lets [crate::sql::dataset::SQLDataset] recognise another
    /// Dataset as one of its own when deciding whether a join/union
    /// can be pushed down into a single SQL statement instead of
    /// falling back to the streaming engine.
    fn as_any(&self) -> &dyn std::any::Any;

    fn columns(&self, job: &Job) -> OrderedSet<Column>;
    fn raster(&self, job: &Job) -> Fallible<Raster>;
    fn stream(&self) -> Box<dyn Stream>;

    fn limit(&self, n: usize) -> Box<dyn Dataset>;
    fn offset(&self, n: usize) -> Box<dyn Dataset>;
    fn random(&self, k: usize) -> Box<dyn Dataset>;
    fn filter(&self, expr: Expr) -> Box<dyn Dataset>;
    fn calculate(&self, targets: Vec<(Column, Expr)>) -> Box<dyn Dataset>;
    fn select_columns(&self, columns: OrderedSet<Column>) -> Box<dyn Dataset>;
    fn aggregate(&self, groups: Vec<(Column, Expr)>, values: Vec<(Column, Aggregator)>) -> Box<dyn Dataset>;
    fn flatten(
        &self,
        value_to: Column,
        column_name_to: Option<Column>,
        row_identifier: Option<Column>,
        to: OrderedSet<Column>,
    ) -> Box<dyn Dataset>;
    fn join(&self, kind: JoinKind, foreign: Arc<dyn Dataset>, expression: Expr) -> Box<dyn Dataset>;
    fn union(&self, other: Arc<dyn Dataset>) -> Box<dyn Dataset>;

    fn distinct(&self) -> Box<dyn Dataset>;
    fn sort(&self, orders: Vec<Order>) -> Box<dyn Dataset>;
    fn transpose(&self) -> Box<dyn Dataset>;
    fn pivot(&self, horizontal: Column, vertical: Column, values: Aggregator) -> Box<dyn Dataset>;
    fn unique(&self, job: &Job, expr: Expr) -> Fallible<Vec<crate::value::Value>>;

    /// Default: materialise and count. A Dataset backed by something
    /// that can answer more cheaply (a row-count-carrying file format,
    /// a SQL `COUNT(*)`) should override this.
    fn describe(&self, job: &Job) -> Fallible<DatasetSummary> {
        let raster = self.raster(job)?;
        Ok(DatasetSummary { columns: raster.columns().clone(), row_count: raster.rows().len() })
    }
}

/// A lazily-computed operation that needs the whole table at once.
/// Wrapped in [LazyStream] so it composes with the rest of
/// [crate::stream] without a special-cased Dataset variant.
#[derive(Clone)]
enum RasterOp {
    Distinct,
    Sort(Vec<Order>),
    Transpose,
    Pivot(Column, Column, Aggregator),
}

impl RasterOp {
    fn apply(&self, raster: &Raster) -> Raster {
        match self {
            RasterOp::Distinct => raster.distinct(),
            RasterOp::Sort(orders) => raster.sort(orders),
            RasterOp::Transpose => raster.transpose(),
            RasterOp::Pivot(horizontal, vertical, values) => raster.pivot(horizontal, vertical, values),
        }
    }
}

enum LazyState {
    Pending,
    Ready { schema: Arc<OrderedSet<Column>>, rows: Arc<Vec<Row>>, cursor: usize },
}

/// Materialises `upstream` on first `fetch`/`columns` call, applies
/// `op`, and serves the result like a [RowSource] from then on. The
/// cache lives behind a [Mutex] since [Stream::fetch] takes `&self`.
struct LazyStream {
    upstream: Box<dyn Stream>,
    op: RasterOp,
    state: Mutex<LazyState>,
}

impl LazyStream {
    fn new(upstream: Box<dyn Stream>, op: RasterOp) -> LazyStream {
        LazyStream { upstream, op, state: Mutex::new(LazyState::Pending) }
    }

    fn ensure_materialized(&self, job: &Job) -> Fallible<(Arc<OrderedSet<Column>>, Arc<Vec<Row>>)> {
        {
            let state = self.state.lock();
            if let LazyState::Ready { schema, rows, .. } = &*state {
                return Ok((schema.clone(), rows.clone()));
            }
        }
        let raster = materialize_stream(self.upstream.clone_stream(), job)?;
        let transformed = self.op.apply(&raster);
        let schema = Arc::new(transformed.columns().clone());
        let rows = Arc::new(transformed.into_rows());
        *self.state.lock() = LazyState::Ready { schema: schema.clone(), rows: rows.clone(), cursor: 0 };
        Ok((schema, rows))
    }
}

impl Stream for LazyStream {
    fn columns(&self, job: &Job) -> OrderedSet<Column> {
        self.ensure_materialized(job).map(|(schema, _)| (*schema).clone()).unwrap_or_default()
    }

    fn fetch(&self, job: &Job) -> Fallible<(Vec<Row>, FetchStatus)> {
        self.ensure_materialized(job)?;
        let mut state = self.state.lock();
        match &mut *state {
            LazyState::Ready { rows, cursor, .. } => {
                if *cursor >= rows.len() {
                    return Ok((Vec::new(), FetchStatus::Finished));
                }
                let batch = rows[*cursor..].to_vec();
                *cursor = rows.len();
                Ok((batch, FetchStatus::Finished))
            }
            LazyState::Pending => unreachable!("ensure_materialized always leaves the state Ready"),
        }
    }

    fn clone_stream(&self) -> Box<dyn Stream> {
        Box::new(LazyStream::new(self.upstream.clone_stream(), self.op.clone()))
    }
}

/// Bridges a [Stream] into the [Source] contract a [StreamPuller]
/// drives: a `fetch` returning `Ok(None)` once the underlying stream
/// has signalled [FetchStatus::Finished].
struct FetchSource {
    stream: Box<dyn Stream>,
    job: Job,
    exhausted: std::sync::atomic::AtomicBool,
}

impl Source<Vec<Row>, anyhow::Error> for FetchSource {
    fn fetch(&self) -> Result<Option<Vec<Row>>, anyhow::Error> {
        use std::sync::atomic::Ordering;
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

/// Drives `stream` to completion through a [StreamPuller] sized to
/// the host, collecting every batch in wavefront order (spec §4.1).
fn materialize_stream(stream: Box<dyn Stream>, job: &Job) -> Fallible<Raster> {
    let columns = stream.columns(job);
    let source = Arc::new(FetchSource { stream, job: job.clone(), exhausted: std::sync::atomic::AtomicBool::new(false) });
    let puller = StreamPuller::for_host(job.clone());

    let rows: Arc<Mutex<Vec<Row>>> = Arc::new(Mutex::new(Vec::new()));
    let rows_for_item = rows.clone();
    let (tx, rx) = std::sync::mpsc::channel();
    let tx_error = tx.clone();

    puller.pull(
        source,
        move |batch: Vec<Row>| rows_for_item.lock().extend(batch),
        move || {
            let _ = tx.send(None);
        },
        move |err: anyhow::Error| {
            let _ = tx_error.send(Some(err));
        },
    );

    if let Some(err) = rx.recv().map_err(|_| anyhow::anyhow!("stream materialization ended without a result"))? {
        return Err(err);
    }
    let rows = rows.lock().clone();
    Ok(Raster::new(columns, rows))
}

/// The primary Dataset: a [Stream] plus the composition logic that
/// wires each operator into the matching transformer (spec §4.3-§4.6),
/// falling back to [LazyStream]/[Raster] for the handful of operators
/// that need the whole table materialised first.
pub struct StreamDataset {
    source: Box<dyn Stream>,
}

impl StreamDataset {
    pub fn new(source: Box<dyn Stream>) -> StreamDataset {
        StreamDataset { source }
    }

    pub fn from_rows(columns: OrderedSet<Column>, rows: Vec<Row>) -> StreamDataset {
        StreamDataset::new(Box::new(RowSource::new(columns, rows)))
    }

    fn with_raster_op(&self, op: RasterOp) -> Box<dyn Dataset> {
        Box::new(StreamDataset::new(Box::new(LazyStream::new(self.source.clone_stream(), op))))
    }
}

impl Dataset for StreamDataset {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn columns(&self, job: &Job) -> OrderedSet<Column> {
        self.source.columns(job)
    }

    fn raster(&self, job: &Job) -> Fallible<Raster> {
        materialize_stream(self.source.clone_stream(), job)
    }

    fn stream(&self) -> Box<dyn Stream> {
        self.source.clone_stream()
    }

    fn limit(&self, n: usize) -> Box<dyn Dataset> {
        Box::new(StreamDataset::new(Box::new(stream::Limit::new(self.source.clone_stream(), n))))
    }

    fn offset(&self, n: usize) -> Box<dyn Dataset> {
        Box::new(StreamDataset::new(Box::new(stream::Offset::new(self.source.clone_stream(), n))))
    }

    fn random(&self, k: usize) -> Box<dyn Dataset> {
        Box::new(StreamDataset::new(Box::new(stream::Random::new(self.source.clone_stream(), k))))
    }

    fn filter(&self, expr: Expr) -> Box<dyn Dataset> {
        Box::new(StreamDataset::new(Box::new(stream::Filter::new(self.source.clone_stream(), expr))))
    }

    fn calculate(&self, targets: Vec<(Column, Expr)>) -> Box<dyn Dataset> {
        Box::new(StreamDataset::new(Box::new(stream::Calculate::new(self.source.clone_stream(), targets))))
    }

    fn select_columns(&self, columns: OrderedSet<Column>) -> Box<dyn Dataset> {
        Box::new(StreamDataset::new(Box::new(stream::Columns::new(self.source.clone_stream(), columns))))
    }

    fn aggregate(&self, groups: Vec<(Column, Expr)>, values: Vec<(Column, Aggregator)>) -> Box<dyn Dataset> {
        Box::new(StreamDataset::new(Box::new(stream::Aggregate::new(self.source.clone_stream(), groups, values))))
    }

    fn flatten(
        &self,
        value_to: Column,
        column_name_to: Option<Column>,
        row_identifier: Option<Column>,
        to: OrderedSet<Column>,
    ) -> Box<dyn Dataset> {
        Box::new(StreamDataset::new(Box::new(stream::Flatten::new(
            self.source.clone_stream(),
            value_to,
            column_name_to,
            row_identifier,
            to,
        ))))
    }

    fn join(&self, kind: JoinKind, foreign: Arc<dyn Dataset>, expression: Expr) -> Box<dyn Dataset> {
        let right: Arc<dyn JoinSource> = Arc::new(DatasetJoinSource { dataset: foreign });
        Box::new(StreamDataset::new(Box::new(Join::new(self.source.clone_stream(), right, kind, expression))))
    }

    fn union(&self, other: Arc<dyn Dataset>) -> Box<dyn Dataset> {
        Box::new(StreamDataset::new(Box::new(stream::Union::new(self.source.clone_stream(), other.stream()))))
    }

    fn distinct(&self) -> Box<dyn Dataset> {
        self.with_raster_op(RasterOp::Distinct)
    }

    fn sort(&self, orders: Vec<Order>) -> Box<dyn Dataset> {
        self.with_raster_op(RasterOp::Sort(orders))
    }

    fn transpose(&self) -> Box<dyn Dataset> {
        self.with_raster_op(RasterOp::Transpose)
    }

    fn pivot(&self, horizontal: Column, vertical: Column, values: Aggregator) -> Box<dyn Dataset> {
        self.with_raster_op(RasterOp::Pivot(horizontal, vertical, values))
    }

    fn unique(&self, job: &Job, expr: Expr) -> Fallible<Vec<crate::value::Value>> {
        Ok(self.raster(job)?.unique_values(&expr))
    }
}

/// Thin wrapper around an already-materialised [Raster]: `raster()` and
/// `columns()` answer directly from it, every other operator delegates
/// to the equivalent [StreamDataset] over its rows.
pub struct RasterDataset {
    raster: Raster,
}

impl RasterDataset {
    pub fn new(raster: Raster) -> RasterDataset {
        RasterDataset { raster }
    }

    fn as_stream_dataset(&self) -> StreamDataset {
        StreamDataset::from_rows(self.raster.columns().clone(), self.raster.rows().to_vec())
    }
}

impl Dataset for RasterDataset {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn columns(&self, _job: &Job) -> OrderedSet<Column> {
        self.raster.columns().clone()
    }

    fn raster(&self, _job: &Job) -> Fallible<Raster> {
        Ok(self.raster.clone())
    }

    fn stream(&self) -> Box<dyn Stream> {
        self.as_stream_dataset().stream()
    }

    fn limit(&self, n: usize) -> Box<dyn Dataset> {
        self.as_stream_dataset().limit(n)
    }

    fn offset(&self, n: usize) -> Box<dyn Dataset> {
        self.as_stream_dataset().offset(n)
    }

    fn random(&self, k: usize) -> Box<dyn Dataset> {
        self.as_stream_dataset().random(k)
    }

    fn filter(&self, expr: Expr) -> Box<dyn Dataset> {
        self.as_stream_dataset().filter(expr)
    }

    fn calculate(&self, targets: Vec<(Column, Expr)>) -> Box<dyn Dataset> {
        self.as_stream_dataset().calculate(targets)
    }

    fn select_columns(&self, columns: OrderedSet<Column>) -> Box<dyn Dataset> {
        self.as_stream_dataset().select_columns(columns)
    }

    fn aggregate(&self, groups: Vec<(Column, Expr)>, values: Vec<(Column, Aggregator)>) -> Box<dyn Dataset> {
        self.as_stream_dataset().aggregate(groups, values)
    }

    fn flatten(
        &self,
        value_to: Column,
        column_name_to: Option<Column>,
        row_identifier: Option<Column>,
        to: OrderedSet<Column>,
    ) -> Box<dyn Dataset> {
        self.as_stream_dataset().flatten(value_to, column_name_to, row_identifier, to)
    }

    fn join(&self, kind: JoinKind, foreign: Arc<dyn Dataset>, expression: Expr) -> Box<dyn Dataset> {
        self.as_stream_dataset().join(kind, foreign, expression)
    }

    fn union(&self, other: Arc<dyn Dataset>) -> Box<dyn Dataset> {
        self.as_stream_dataset().union(other)
    }

    fn distinct(&self) -> Box<dyn Dataset> {
        Box::new(RasterDataset::new(self.raster.distinct()))
    }

    fn sort(&self, orders: Vec<Order>) -> Box<dyn Dataset> {
        Box::new(RasterDataset::new(self.raster.sort(&orders)))
    }

    fn transpose(&self) -> Box<dyn Dataset> {
        Box::new(RasterDataset::new(self.raster.transpose()))
    }

    fn pivot(&self, horizontal: Column, vertical: Column, values: Aggregator) -> Box<dyn Dataset> {
        Box::new(RasterDataset::new(self.raster.pivot(&horizontal, &vertical, &values)))
    }

    fn unique(&self, _job: &Job, expr: Expr) -> Fallible<Vec<crate::value::Value>> {
        Ok(self.raster.unique_values(&expr))
    }
}

/// Adapts an `Arc<dyn Dataset>` into the narrower surface [Join]
/// needs from its right side: filter, then materialise (spec §4.4).
struct DatasetJoinSource {
    dataset: Arc<dyn Dataset>,
}

impl JoinSource for DatasetJoinSource {
    fn columns(&self, job: &Job) -> OrderedSet<Column> {
        self.dataset.columns(job)
    }

    fn raster(&self, job: &Job, filter: &Expr) -> Fallible<Vec<Row>> {
        Ok(self.dataset.filter(filter.clone()).raster(job)?.into_rows())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{Binary, ReducerKind};
    use crate::value::Value;

    fn table(columns: &[&str], rows: Vec<Vec<Value>>) -> StreamDataset {
        let schema: OrderedSet<Column> = columns.iter().map(|s| Column::new(*s)).collect();
        let shared = Arc::new(schema.clone());
        let rows = rows.into_iter().map(|values| Row::new(shared.clone(), values)).collect();
        StreamDataset::from_rows(schema, rows)
    }

    #[test]
    fn filter_then_raster_materializes_matching_rows() {
        let ds = table(&["x"], vec![vec![Value::Int(1)], vec![Value::Int(2)], vec![Value::Int(3)]]);
        let job = Job::root();

        let filtered = ds.filter(Expr::comparison(Expr::Sibling(Column::new("x")), Expr::Literal(Value::Int(2)), Binary::Greater));
        let raster = filtered.raster(&job).unwrap();
        assert_eq!(raster.rows().len(), 1);
        assert_eq!(raster.rows()[0].get(&Column::new("x")), &Value::Int(3));
    }

    #[test]
    fn distinct_deduplicates_via_raster_fallback() {
        let ds = table(&["x"], vec![vec![Value::Int(1)], vec![Value::Int(1)], vec![Value::Int(2)]]);
        let job = Job::root();

        let distinct = ds.distinct();
        let raster = distinct.raster(&job).unwrap();
        assert_eq!(raster.rows().len(), 2);
    }

    #[test]
    fn aggregate_then_sort_composes_two_operators() {
        let ds = table(
            &["team", "score"],
            vec![
                vec![Value::String("a".into()), Value::Int(1)],
                vec![Value::String("b".into()), Value::Int(5)],
                vec![Value::String("a".into()), Value::Int(2)],
            ],
        );
        let job = Job::root();

        let aggregated = ds.aggregate(
            vec![(Column::new("team"), Expr::Sibling(Column::new("team")))],
            vec![(Column::new("total"), Aggregator::new(Expr::Sibling(Column::new("score")), ReducerKind::Sum))],
        );
        let sorted = aggregated.sort(vec![Order { expression: Expr::Sibling(Column::new("total")), ascending: false, numeric: true }]);
        let raster = sorted.raster(&job).unwrap();

        assert_eq!(raster.rows()[0].get(&Column::new("team")), &Value::String("b".into()));
        assert_eq!(raster.rows()[1].get(&Column::new("team")), &Value::String("a".into()));
    }

    #[test]
    fn join_pulls_matching_rows_from_another_dataset() {
        let left = table(&["id", "qty"], vec![vec![Value::Int(1), Value::Int(10)], vec![Value::Int(9), Value::Int(99)]]);
        let right: Arc<dyn Dataset> =
            Arc::new(table(&["id", "name"], vec![vec![Value::Int(1), Value::String("a".into())]]));
        let job = Job::root();

        let joined = left.join(
            JoinKind::Inner,
            right,
            Expr::comparison(Expr::Foreign(Column::new("id")), Expr::Sibling(Column::new("id")), Binary::Equal),
        );
        let raster = joined.raster(&job).unwrap();
        assert_eq!(raster.rows().len(), 1);
        assert_eq!(raster.rows()[0].get(&Column::new("name")), &Value::String("a".into()));
    }

    #[test]
    fn describe_reports_schema_and_row_count() {
        let ds = table(&["x"], vec![vec![Value::Int(1)], vec![Value::Int(2)]]);
        let job = Job::root();
        let summary = ds.describe(&job).unwrap();
        assert_eq!(summary.row_count, 2);
        assert!(summary.columns.contains(&Column::new("x")));
    }
}
