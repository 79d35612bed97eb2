//! [RowSource]: an in-memory [Stream] over a fixed `Vec<Row>`, the base
//! case most transformers are tested against and the leaf a
//! [crate::dataset::StreamDataset] wraps when it has no backing I/O.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::{FetchStatus, Stream};
use crate::concurrency::Job;
use crate::error::Fallible;
use crate::value::{Column, OrderedSet, Row};

pub struct RowSource {
    columns: Arc<OrderedSet<Column>>,
    rows: Arc<Vec<Row>>,
    batch_size: usize,
    cursor: AtomicUsize,
}

impl RowSource {
    pub fn new(columns: OrderedSet<Column>, rows: Vec<Row>) -> RowSource {
        RowSource { columns: Arc::new(columns), rows: Arc::new(rows), batch_size: 1024, cursor: AtomicUsize::new(0) }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> RowSource {
        self.batch_size = batch_size.max(1);
        self
    }
}

impl Stream for RowSource {
    fn columns(&self, _job: &Job) -> OrderedSet<Column> {
        (*self.columns).clone()
    }

    fn fetch(&self, _job: &Job) -> Fallible<(Vec<Row>, FetchStatus)> {
        let start = self.cursor.fetch_add(self.batch_size, Ordering::SeqCst);
        if start >= self.rows.len() {
            return Ok((Vec::new(), FetchStatus::Finished));
        }
        let end = (start + self.batch_size).min(self.rows.len());
        let batch = self.rows[start..end].to_vec();
        let status = if end >= self.rows.len() { FetchStatus::Finished } else { FetchStatus::HasMore };
        Ok((batch, status))
    }

    fn clone_stream(&self) -> Box<dyn Stream> {
        Box::new(RowSource {
            columns: self.columns.clone(),
            rows: self.rows.clone(),
            batch_size: self.batch_size,
            cursor: AtomicUsize::new(0),
        })
    }
}
