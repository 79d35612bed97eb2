//! [Columns]: projects and reorders columns by name; missing names are
//! skipped rather than surfacing as Invalid (spec §4.3).

use super::{FetchStatus, Stream, TransformerCore};
use crate::concurrency::Job;
use crate::error::Fallible;
use crate::value::{Column, OrderedSet, Row};

pub struct Columns {
    upstream: Box<dyn Stream>,
    requested: OrderedSet<Column>,
    core: TransformerCore,
}

impl Columns {
    pub fn new(upstream: Box<dyn Stream>, requested: OrderedSet<Column>) -> Columns {
        Columns { upstream, requested, core: TransformerCore::new() }
    }

    /// The requested list filtered down to names actually present
    /// upstream, in the requested order — this is what makes "missing
    /// names are skipped" true for both `columns()` and `fetch()`
    /// without [Row::select] needing a skip-aware variant.
    fn effective_schema(&self, job: &Job) -> OrderedSet<Column> {
        let upstream_schema = self.upstream.columns(job);
        self.requested.iter().filter(|c| upstream_schema.contains(c)).cloned().collect()
    }
}

impl Stream for Columns {
    fn columns(&self, job: &Job) -> OrderedSet<Column> {
        self.effective_schema(job)
    }

    fn fetch(&self, job: &Job) -> Fallible<(Vec<Row>, FetchStatus)> {
        self.core.report_start(job);
        let schema = self.effective_schema(job);
        let (rows, status) = self.upstream.fetch(job)?;
        let projected = rows.into_iter().map(|row| row.select(&schema)).collect();
        if status == FetchStatus::Finished {
            self.core.report_done(job);
        }
        Ok((projected, status))
    }

    fn clone_stream(&self) -> Box<dyn Stream> {
        Box::new(Columns::new(self.upstream.clone_stream(), self.requested.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::RowSource;
    use crate::value::Value;
    use std::sync::Arc;

    #[test]
    fn missing_names_are_skipped_and_order_is_reordered() {
        let columns: OrderedSet<Column> = ["a", "b"].iter().map(|s| Column::new(*s)).collect();
        let shared = Arc::new(columns.clone());
        let rows = vec![Row::new(shared.clone(), vec![Value::Int(1), Value::Int(2)])];
        let source = RowSource::new(columns, rows);

        let requested: OrderedSet<Column> = ["b", "ghost", "a"].iter().map(|s| Column::new(*s)).collect();
        let projection = Columns::new(Box::new(source), requested);
        let job = Job::root();

        let schema = projection.columns(&job);
        let names: Vec<_> = schema.iter().map(|c| c.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);

        let (rows, _) = projection.fetch(&job).unwrap();
        assert_eq!(rows[0].values(), &[Value::Int(2), Value::Int(1)]);
    }
}
