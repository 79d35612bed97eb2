//! [Filter]: retains rows matching a boolean condition.

use super::{FetchStatus, Stream, TransformerCore};
use crate::concurrency::Job;
use crate::error::Fallible;
use crate::expr::Expr;
use crate::value::{Column, OrderedSet, Value};

pub struct Filter {
    upstream: Box<dyn Stream>,
    condition: Expr,
    core: TransformerCore,
}

impl Filter {
    pub fn new(upstream: Box<dyn Stream>, condition: Expr) -> Filter {
        Filter { upstream, condition: condition.prepare(), core: TransformerCore::new() }
    }
}

impl Stream for Filter {
    fn columns(&self, job: &Job) -> OrderedSet<Column> {
        self.upstream.columns(job)
    }

    fn fetch(&self, job: &Job) -> Fallible<(Vec<crate::value::Row>, FetchStatus)> {
        self.core.report_start(job);
        let (rows, status) = self.upstream.fetch(job)?;
        let kept = rows
            .into_iter()
            .filter(|row| self.condition.apply(row, None, None) == Value::Bool(true))
            .collect();
        if status == FetchStatus::Finished {
            self.core.report_done(job);
        }
        Ok((kept, status))
    }

    fn clone_stream(&self) -> Box<dyn Stream> {
        Box::new(Filter::new(self.upstream.clone_stream(), self.condition.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Binary;
    use crate::stream::RowSource;
    use crate::value::Row;
    use std::sync::Arc;

    #[test]
    fn keeps_only_matching_rows() {
        let columns: OrderedSet<Column> = ["x"].iter().map(|s| Column::new(*s)).collect();
        let shared = Arc::new(columns.clone());
        let rows = vec![
            Row::new(shared.clone(), vec![Value::Int(1)]),
            Row::new(shared.clone(), vec![Value::Int(3)]),
        ];
        let source = RowSource::new(columns, rows);
        let condition = Expr::comparison(
            Expr::Literal(Value::Int(3)),
            Expr::Sibling(Column::new("x")),
            Binary::Equal,
        );
        let filter = Filter::new(Box::new(source), condition);
        let job = Job::root();

        let (kept, status) = filter.fetch(&job).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].at(0), &Value::Int(3));
        assert_eq!(status, FetchStatus::Finished);
    }
}
