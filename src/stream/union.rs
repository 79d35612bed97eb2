//! [Union]: concatenates two streams, left then right (spec §6).

use std::sync::atomic::{AtomicBool, Ordering};

use super::{FetchStatus, Stream, TransformerCore};
use crate::concurrency::Job;
use crate::error::Fallible;
use crate::value::{Column, OrderedSet, Row};

pub struct Union {
    left: Box<dyn Stream>,
    right: Box<dyn Stream>,
    left_finished: AtomicBool,
    core: TransformerCore,
}

impl Union {
    pub fn new(left: Box<dyn Stream>, right: Box<dyn Stream>) -> Union {
        Union { left, right, left_finished: AtomicBool::new(false), core: TransformerCore::new() }
    }
}

impl Stream for Union {
    fn columns(&self, job: &Job) -> OrderedSet<Column> {
        self.left.columns(job)
    }

    fn fetch(&self, job: &Job) -> Fallible<(Vec<Row>, FetchStatus)> {
        self.core.report_start(job);
        if !self.left_finished.load(Ordering::SeqCst) {
            let (rows, status) = self.left.fetch(job)?;
            if status == FetchStatus::Finished {
                self.left_finished.store(true, Ordering::SeqCst);
            }
            return Ok((rows, FetchStatus::HasMore));
        }

        let (rows, status) = self.right.fetch(job)?;
        if status == FetchStatus::Finished {
            self.core.report_done(job);
        }
        Ok((rows, status))
    }

    fn clone_stream(&self) -> Box<dyn Stream> {
        Box::new(Union::new(self.left.clone_stream(), self.right.clone_stream()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::RowSource;
    use crate::value::Value;
    use std::sync::Arc;

    fn source(values: Vec<i64>) -> Box<dyn Stream> {
        let columns: OrderedSet<Column> = ["x"].iter().map(|s| Column::new(*s)).collect();
        let shared = Arc::new(columns.clone());
        let rows = values.into_iter().map(|v| Row::new(shared.clone(), vec![Value::Int(v)])).collect();
        Box::new(RowSource::new(columns, rows))
    }

    #[test]
    fn concatenates_left_then_right() {
        let union = Union::new(source(vec![1, 2]), source(vec![3]));
        let job = Job::root();

        let mut all = Vec::new();
        loop {
            let (batch, status) = union.fetch(&job).unwrap();
            all.extend(batch);
            if status == FetchStatus::Finished {
                break;
            }
        }
        let values: Vec<_> = all.iter().map(|r| r.get(&Column::new("x")).clone()).collect();
        assert_eq!(values, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    }
}
