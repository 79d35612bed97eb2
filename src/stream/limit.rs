//! [Limit]: streams at most N rows then signals Finished.

use std::sync::atomic::{AtomicUsize, Ordering};

use super::{FetchStatus, Stream, TransformerCore};
use crate::concurrency::Job;
use crate::error::Fallible;
use crate::value::{Column, OrderedSet, Row};

pub struct Limit {
    upstream: Box<dyn Stream>,
    n: usize,
    delivered: AtomicUsize,
    core: TransformerCore,
}

impl Limit {
    pub fn new(upstream: Box<dyn Stream>, n: usize) -> Limit {
        Limit { upstream, n, delivered: AtomicUsize::new(0), core: TransformerCore::new() }
    }
}

impl Stream for Limit {
    fn columns(&self, job: &Job) -> OrderedSet<Column> {
        self.upstream.columns(job)
    }

    fn fetch(&self, job: &Job) -> Fallible<(Vec<Row>, FetchStatus)> {
        self.core.report_start(job);
        let already = self.delivered.load(Ordering::SeqCst);
        if already >= self.n {
            self.core.report_done(job);
            return Ok((Vec::new(), FetchStatus::Finished));
        }

        let (mut rows, upstream_status) = self.upstream.fetch(job)?;
        let remaining = self.n - already;
        let status = if rows.len() >= remaining {
            rows.truncate(remaining);
            FetchStatus::Finished
        } else {
            upstream_status
        };
        let delivered_now = self.delivered.fetch_add(rows.len(), Ordering::SeqCst) + rows.len();
        job.report_progress(delivered_now as f64 / self.n.max(1) as f64, self.core_id());

        if status == FetchStatus::Finished {
            self.core.report_done(job);
        }
        Ok((rows, status))
    }

    fn clone_stream(&self) -> Box<dyn Stream> {
        Box::new(Limit::new(self.upstream.clone_stream(), self.n))
    }
}

impl Limit {
    fn core_id(&self) -> u64 {
        self.core.id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::RowSource;
    use crate::value::Value;
    use std::sync::Arc;

    #[test]
    fn stops_after_n_rows() {
        let columns: OrderedSet<Column> = ["x"].iter().map(|s| Column::new(*s)).collect();
        let shared = Arc::new(columns.clone());
        let rows: Vec<Row> = (0..5).map(|i| Row::new(shared.clone(), vec![Value::Int(i)])).collect();
        let source = RowSource::new(columns, rows).with_batch_size(10);
        let limit = Limit::new(Box::new(source), 2);
        let job = Job::root();

        let (batch, status) = limit.fetch(&job).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(status, FetchStatus::Finished);
    }
}
