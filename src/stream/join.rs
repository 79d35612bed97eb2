//! [Join]: disjunctive filter pushdown against the right side followed
//! by an in-memory nested-loop match (spec §4.4).

use std::sync::Arc;

use super::{FetchStatus, Stream, TransformerCore};
use crate::concurrency::Job;
use crate::error::Fallible;
use crate::expr::{Expr, Function};
use crate::value::{Column, OrderedSet, Row, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

/// The right side of a join: anything that can report its schema and
/// answer "give me a pruned raster of rows that might satisfy this
/// filter" (spec §4.4). A Dataset implements this directly; a plain
/// in-memory table can too, ignoring the filter and returning
/// everything.
pub trait JoinSource: Send + Sync {
    fn columns(&self, job: &Job) -> OrderedSet<Column>;
    fn raster(&self, job: &Job, filter: &Expr) -> Fallible<Vec<Row>>;
}

pub struct Join {
    left: Box<dyn Stream>,
    right: Arc<dyn JoinSource>,
    kind: JoinKind,
    condition: Expr,
    core: TransformerCore,
}

impl Join {
    pub fn new(left: Box<dyn Stream>, right: Arc<dyn JoinSource>, kind: JoinKind, condition: Expr) -> Join {
        Join { left, right, kind, condition, core: TransformerCore::new() }
    }

    /// Right columns not already present on the left, in the right's
    /// own declared order (spec §4.4 column-set preflight).
    fn new_right_columns(&self, job: &Job) -> Vec<Column> {
        let left_columns = self.left.columns(job);
        self.right.columns(job).iter().filter(|c| !left_columns.contains(c)).cloned().collect()
    }

    fn output_schema(&self, job: &Job) -> OrderedSet<Column> {
        let mut schema = self.left.columns(job);
        for column in self.new_right_columns(job) {
            schema.insert(column);
        }
        schema
    }
}

impl Stream for Join {
    fn columns(&self, job: &Job) -> OrderedSet<Column> {
        self.output_schema(job)
    }

    fn fetch(&self, job: &Job) -> Fallible<(Vec<Row>, FetchStatus)> {
        self.core.report_start(job);
        let (rows, status) = self.left.fetch(job)?;

        let new_right_columns = self.new_right_columns(job);
        if new_right_columns.is_empty() {
            // The right side contributes nothing new: forward left rows
            // verbatim instead of paying for a raster fetch that would
            // only confirm matches without changing the output.
            if status == FetchStatus::Finished {
                self.core.report_done(job);
            }
            return Ok((rows, status));
        }

        let schema = Arc::new(self.output_schema(job));
        let mut matched = Vec::with_capacity(rows.len());
        if !rows.is_empty() {
            let filter = disjunctive_filter(&self.condition, &rows);
            let raster = self.right.raster(job, &filter)?;

            for left_row in &rows {
                let mut any_match = false;
                for right_row in &raster {
                    if self.condition.apply(left_row, Some(right_row), None) == Value::Bool(true) {
                        any_match = true;
                        matched.push(merge_row(left_row, Some(right_row), &new_right_columns, &schema));
                    }
                }
                if !any_match && self.kind == JoinKind::Left {
                    matched.push(merge_row(left_row, None, &new_right_columns, &schema));
                }
            }
        }

        if status == FetchStatus::Finished {
            self.core.report_done(job);
        }
        Ok((matched, status))
    }

    fn clone_stream(&self) -> Box<dyn Stream> {
        Box::new(Join {
            left: self.left.clone_stream(),
            right: self.right.clone(),
            kind: self.kind,
            condition: self.condition.clone(),
            core: TransformerCore::new(),
        })
    }
}

fn merge_row(left_row: &Row, right_row: Option<&Row>, new_right_columns: &[Column], schema: &Arc<OrderedSet<Column>>) -> Row {
    let mut values: Vec<Value> = left_row.values().to_vec();
    for column in new_right_columns {
        values.push(right_row.map(|r| r.get(column).clone()).unwrap_or(Value::Empty));
    }
    Row::new(schema.clone(), values).padded_to(schema.clone())
}

/// `Or(condition[row0/left], condition[row1/left], ...)`: the join
/// expression with every `Sibling` replaced by the matching left row's
/// literal value and every `Foreign` turned into a `Sibling` so the
/// result can be evaluated directly against the right side's own rows.
fn disjunctive_filter(condition: &Expr, left_rows: &[Row]) -> Expr {
    let arms = left_rows.iter().map(|row| specialize_for_right(condition, row)).collect();
    Expr::call(arms, Function::Or)
}

fn specialize_for_right(expr: &Expr, left_row: &Row) -> Expr {
    match expr {
        Expr::Literal(v) => Expr::Literal(v.clone()),
        Expr::Identity => Expr::Identity,
        Expr::Sibling(c) => Expr::Literal(left_row.get(c).clone()),
        Expr::Foreign(c) => Expr::Sibling(c.clone()),
        Expr::Comparison { first, second, op } => Expr::Comparison {
            first: Box::new(specialize_for_right(first, left_row)),
            second: Box::new(specialize_for_right(second, left_row)),
            op: *op,
        },
        Expr::Call { args, function } => {
            Expr::Call { args: args.iter().map(|a| specialize_for_right(a, left_row)).collect(), function: *function }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Binary;
    use crate::stream::RowSource;
    use std::sync::Arc as StdArc;

    struct Table {
        columns: OrderedSet<Column>,
        rows: Vec<Row>,
    }

    impl JoinSource for Table {
        fn columns(&self, _job: &Job) -> OrderedSet<Column> {
            self.columns.clone()
        }

        fn raster(&self, _job: &Job, _filter: &Expr) -> Fallible<Vec<Row>> {
            Ok(self.rows.clone())
        }
    }

    fn condition() -> Expr {
        Expr::comparison(Expr::Foreign(Column::new("id")), Expr::Sibling(Column::new("id")), Binary::Equal)
    }

    fn right_table() -> Arc<dyn JoinSource> {
        let columns: OrderedSet<Column> = ["id", "name"].iter().map(|s| Column::new(*s)).collect();
        let shared = StdArc::new(columns.clone());
        let rows = vec![
            Row::new(shared.clone(), vec![Value::Int(1), Value::String("a".into())]),
            Row::new(shared.clone(), vec![Value::Int(2), Value::String("b".into())]),
        ];
        Arc::new(Table { columns, rows })
    }

    fn left_stream() -> Box<dyn Stream> {
        let columns: OrderedSet<Column> = ["id", "qty"].iter().map(|s| Column::new(*s)).collect();
        let shared = StdArc::new(columns.clone());
        let rows = vec![
            Row::new(shared.clone(), vec![Value::Int(1), Value::Int(10)]),
            Row::new(shared.clone(), vec![Value::Int(9), Value::Int(99)]),
        ];
        Box::new(RowSource::new(columns, rows))
    }

    #[test]
    fn inner_join_drops_unmatched_left_rows() {
        let join = Join::new(left_stream(), right_table(), JoinKind::Inner, condition());
        let job = Job::root();

        let (rows, status) = join.fetch(&job).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get(&Column::new("name")), &Value::String("a".into()));
        assert_eq!(status, FetchStatus::Finished);
    }

    #[test]
    fn left_join_keeps_unmatched_rows_with_empty_right_columns() {
        let join = Join::new(left_stream(), right_table(), JoinKind::Left, condition());
        let job = Job::root();

        let (rows, _) = join.fetch(&job).unwrap();
        assert_eq!(rows.len(), 2);
        let unmatched = rows.iter().find(|r| r.get(&Column::new("qty")) == &Value::Int(99)).unwrap();
        assert_eq!(unmatched.get(&Column::new("name")), &Value::Empty);
    }

    #[test]
    fn short_circuits_when_right_adds_no_new_columns() {
        let columns: OrderedSet<Column> = ["id"].iter().map(|s| Column::new(*s)).collect();
        let right: Arc<dyn JoinSource> = Arc::new(Table { columns, rows: Vec::new() });
        let join = Join::new(left_stream(), right, JoinKind::Inner, condition());
        let job = Job::root();

        let (rows, _) = join.fetch(&job).unwrap();
        assert_eq!(rows.len(), 2);
    }
}
