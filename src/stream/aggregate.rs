//! [Aggregate]: groups rows by one or more expressions and reduces one
//! or more value expressions per group (spec §4.5).
//!
//! Like [super::Random], the output can't be known until the upstream
//! is exhausted, so `fetch` buffers into the group catalog and only
//! emits once, from the `finish` hook.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{FetchStatus, Stream, TransformerCore};
use crate::concurrency::Job;
use crate::error::Fallible;
use crate::expr::{Aggregator, Expr, Reducer};
use crate::value::{Column, OrderedSet, Row, Value};

struct Leaf {
    key: Vec<Value>,
    reducers: Vec<Box<dyn Reducer>>,
}

/// Keyed by the vector of group-expression values (spec §4.5). Value
/// has no total `Eq` (Invalid never equals itself), so lookups go
/// through a string-rendered canonical key with an exact `value_eq`
/// check over any same-canonical candidates, and a row whose group key
/// contains an Invalid always starts a fresh leaf rather than reusing
/// one.
#[derive(Default)]
struct Catalog {
    leaves: Vec<Leaf>,
    index: HashMap<String, Vec<usize>>,
}

impl Catalog {
    fn find_or_create(&mut self, key: &[Value], values: &[(Column, Aggregator)]) -> usize {
        let any_invalid = key.iter().any(Value::is_invalid);
        let canonical = canonical_key(key);
        if !any_invalid {
            if let Some(candidates) = self.index.get(&canonical) {
                for &idx in candidates {
                    if key_eq(&self.leaves[idx].key, key) {
                        return idx;
                    }
                }
            }
        }
        let reducers = values.iter().map(|(_, a)| a.new_reducer()).collect();
        let idx = self.leaves.len();
        self.leaves.push(Leaf { key: key.to_vec(), reducers });
        self.index.entry(canonical).or_default().push(idx);
        idx
    }
}

fn canonical_key(key: &[Value]) -> String {
    key.iter().map(|v| v.as_string().unwrap_or_else(|| "\u{0}".to_string())).collect::<Vec<_>>().join("\u{1}")
}

fn key_eq(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.value_eq(y))
}

pub struct Aggregate {
    upstream: Box<dyn Stream>,
    groups: Vec<(Column, Expr)>,
    values: Vec<(Column, Aggregator)>,
    catalog: Mutex<Catalog>,
    core: TransformerCore,
}

impl Aggregate {
    /// Panics if a group or value target column name is duplicated —
    /// the spec treats this as a programming error, not a runtime
    /// failure surfaced through `Fallible`.
    pub fn new(upstream: Box<dyn Stream>, groups: Vec<(Column, Expr)>, values: Vec<(Column, Aggregator)>) -> Aggregate {
        let groups: Vec<(Column, Expr)> = groups.into_iter().map(|(c, e)| (c, e.prepare())).collect();
        let values: Vec<(Column, Aggregator)> =
            values.into_iter().map(|(c, a)| (c, Aggregator::new(a.map.prepare(), a.reduce))).collect();

        let mut seen: OrderedSet<Column> = OrderedSet::new();
        for column in groups.iter().map(|(c, _)| c).chain(values.iter().map(|(c, _)| c)) {
            assert!(seen.insert(column.clone()), "duplicate aggregate target column: {column}");
        }

        Aggregate { upstream, groups, values, catalog: Mutex::new(Catalog::default()), core: TransformerCore::new() }
    }

    fn output_schema(&self) -> OrderedSet<Column> {
        self.groups.iter().map(|(c, _)| c.clone()).chain(self.values.iter().map(|(c, _)| c.clone())).collect()
    }

    fn absorb(&self, rows: &[Row]) {
        let mut catalog = self.catalog.lock();
        for row in rows {
            let key: Vec<Value> = self.groups.iter().map(|(_, expr)| expr.apply(row, None, None)).collect();
            let leaf = catalog.find_or_create(&key, &self.values);
            for (i, (_, aggregator)) in self.values.iter().enumerate() {
                let mapped = aggregator.map.apply(row, None, None);
                catalog.leaves[leaf].reducers[i].add(&mapped);
            }
        }
    }

    fn emit_leaf(leaf: &Leaf, schema: &Arc<OrderedSet<Column>>) -> Row {
        let mut values = leaf.key.clone();
        values.extend(leaf.reducers.iter().map(|r| r.result()));
        Row::new(schema.clone(), values)
    }
}

impl Stream for Aggregate {
    fn columns(&self, _job: &Job) -> OrderedSet<Column> {
        self.output_schema()
    }

    fn fetch(&self, job: &Job) -> Fallible<(Vec<Row>, FetchStatus)> {
        self.core.report_start(job);
        let (rows, status) = self.upstream.fetch(job)?;
        self.absorb(&rows);

        if status == FetchStatus::Finished && self.core.take_finish() {
            let schema = Arc::new(self.output_schema());
            let emitted = self.catalog.lock().leaves.iter().map(|leaf| Aggregate::emit_leaf(leaf, &schema)).collect();
            self.core.report_done(job);
            return Ok((emitted, FetchStatus::Finished));
        }
        if status == FetchStatus::Finished {
            return Ok((Vec::new(), FetchStatus::Finished));
        }
        Ok((Vec::new(), FetchStatus::HasMore))
    }

    fn clone_stream(&self) -> Box<dyn Stream> {
        Box::new(Aggregate {
            upstream: self.upstream.clone_stream(),
            groups: self.groups.clone(),
            values: self.values.clone(),
            catalog: Mutex::new(Catalog::default()),
            core: TransformerCore::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::ReducerKind;
    use crate::stream::RowSource;
    use std::sync::Arc as StdArc;

    fn source_rows() -> (OrderedSet<Column>, Vec<Row>) {
        let columns: OrderedSet<Column> = ["team", "score"].iter().map(|s| Column::new(*s)).collect();
        let shared = StdArc::new(columns.clone());
        let rows = vec![
            Row::new(shared.clone(), vec![Value::String("a".into()), Value::Int(1)]),
            Row::new(shared.clone(), vec![Value::String("b".into()), Value::Int(2)]),
            Row::new(shared.clone(), vec![Value::String("a".into()), Value::Int(3)]),
        ];
        (columns, rows)
    }

    #[test]
    fn groups_and_sums_per_key() {
        let (columns, rows) = source_rows();
        let source = RowSource::new(columns, rows);
        let aggregate = Aggregate::new(
            Box::new(source),
            vec![(Column::new("team"), Expr::Sibling(Column::new("team")))],
            vec![(Column::new("total"), Aggregator::new(Expr::Sibling(Column::new("score")), ReducerKind::Sum))],
        );
        let job = Job::root();

        let (rows, status) = aggregate.fetch(&job).unwrap();
        assert_eq!(status, FetchStatus::Finished);
        assert_eq!(rows.len(), 2);
        let a = rows.iter().find(|r| r.get(&Column::new("team")) == &Value::String("a".into())).unwrap();
        assert_eq!(a.get(&Column::new("total")), &Value::Double(4.0));
        let b = rows.iter().find(|r| r.get(&Column::new("team")) == &Value::String("b".into())).unwrap();
        assert_eq!(b.get(&Column::new("total")), &Value::Double(2.0));
    }

    #[test]
    fn invalid_group_keys_never_merge() {
        let columns: OrderedSet<Column> = ["x"].iter().map(|s| Column::new(*s)).collect();
        let shared = StdArc::new(columns.clone());
        let rows = vec![Row::new(shared.clone(), vec![Value::Invalid]), Row::new(shared.clone(), vec![Value::Invalid])];
        let source = RowSource::new(columns, rows);
        let aggregate = Aggregate::new(
            Box::new(source),
            vec![(Column::new("x"), Expr::Sibling(Column::new("x")))],
            vec![(Column::new("n"), Aggregator::new(Expr::Literal(Value::Int(1)), ReducerKind::CountAll))],
        );
        let job = Job::root();

        let (rows, _) = aggregate.fetch(&job).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    #[should_panic(expected = "duplicate aggregate target column")]
    fn duplicate_target_columns_panic() {
        let (columns, rows) = source_rows();
        let source = RowSource::new(columns, rows);
        Aggregate::new(
            Box::new(source),
            vec![(Column::new("team"), Expr::Sibling(Column::new("team")))],
            vec![(Column::new("team"), Aggregator::new(Expr::Sibling(Column::new("score")), ReducerKind::Sum))],
        );
    }
}
