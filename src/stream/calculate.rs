//! [Calculate]: appends computed columns to every row.

use std::sync::Arc;

use super::{FetchStatus, Stream, TransformerCore};
use crate::concurrency::Job;
use crate::error::Fallible;
use crate::expr::Expr;
use crate::value::{Column, OrderedSet, Row};

pub struct Calculate {
    upstream: Box<dyn Stream>,
    /// `prepare` is applied once here, at construction, not per row
    /// (spec §4.3).
    targets: Vec<(Column, Expr)>,
    core: TransformerCore,
}

impl Calculate {
    pub fn new(upstream: Box<dyn Stream>, targets: Vec<(Column, Expr)>) -> Calculate {
        let targets = targets.into_iter().map(|(c, e)| (c, e.prepare())).collect();
        Calculate { upstream, targets, core: TransformerCore::new() }
    }

    fn extended_schema(&self, job: &Job) -> OrderedSet<Column> {
        let mut schema = self.upstream.columns(job);
        for (column, _) in &self.targets {
            schema.insert(column.clone());
        }
        schema
    }
}

impl Stream for Calculate {
    fn columns(&self, job: &Job) -> OrderedSet<Column> {
        self.extended_schema(job)
    }

    fn fetch(&self, job: &Job) -> Fallible<(Vec<Row>, FetchStatus)> {
        self.core.report_start(job);
        let (rows, status) = self.upstream.fetch(job)?;
        let schema = Arc::new(self.extended_schema(job));

        let calculated = rows
            .into_iter()
            .map(|row| {
                let mut values: Vec<_> = row.values().to_vec();
                for (_, expr) in &self.targets {
                    values.push(expr.apply(&row, None, None));
                }
                Row::new(schema.clone(), values).padded_to(schema.clone())
            })
            .collect();

        if status == FetchStatus::Finished {
            self.core.report_done(job);
        }
        Ok((calculated, status))
    }

    fn clone_stream(&self) -> Box<dyn Stream> {
        Box::new(Calculate { upstream: self.upstream.clone_stream(), targets: self.targets.clone(), core: TransformerCore::new() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Binary;
    use crate::stream::RowSource;
    use crate::value::Value;

    #[test]
    fn appends_a_computed_column() {
        let columns: OrderedSet<Column> = ["a"].iter().map(|s| Column::new(*s)).collect();
        let shared = Arc::new(columns.clone());
        let rows = vec![Row::new(shared.clone(), vec![Value::Int(2)])];
        let source = RowSource::new(columns, rows);

        let doubled = Expr::comparison(Expr::Sibling(Column::new("a")), Expr::Sibling(Column::new("a")), Binary::Addition);
        let calc = Calculate::new(Box::new(source), vec![(Column::new("b"), doubled)]);
        let job = Job::root();

        let schema = calc.columns(&job);
        assert_eq!(schema.len(), 2);

        let (rows, _) = calc.fetch(&job).unwrap();
        assert_eq!(rows[0].at(1), &Value::Double(4.0));
    }
}
