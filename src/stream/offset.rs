//! [Offset]: discards the first N rows across batches.

use std::sync::atomic::{AtomicUsize, Ordering};

use super::{FetchStatus, Stream, TransformerCore};
use crate::concurrency::Job;
use crate::error::Fallible;
use crate::value::{Column, OrderedSet, Row};

pub struct Offset {
    upstream: Box<dyn Stream>,
    n: usize,
    skipped: AtomicUsize,
    core: TransformerCore,
}

impl Offset {
    pub fn new(upstream: Box<dyn Stream>, n: usize) -> Offset {
        Offset { upstream, n, skipped: AtomicUsize::new(0), core: TransformerCore::new() }
    }
}

impl Stream for Offset {
    fn columns(&self, job: &Job) -> OrderedSet<Column> {
        self.upstream.columns(job)
    }

    fn fetch(&self, job: &Job) -> Fallible<(Vec<Row>, FetchStatus)> {
        self.core.report_start(job);
        loop {
            let (rows, status) = self.upstream.fetch(job)?;
            let already_skipped = self.skipped.load(Ordering::SeqCst);
            let to_skip = self.n.saturating_sub(already_skipped).min(rows.len());
            self.skipped.fetch_add(to_skip, Ordering::SeqCst);
            let remainder: Vec<Row> = rows.into_iter().skip(to_skip).collect();

            if status == FetchStatus::Finished {
                self.core.report_done(job);
                return Ok((remainder, status));
            }
            if !remainder.is_empty() || to_skip == 0 {
                return Ok((remainder, status));
            }
            // The whole batch was consumed by the offset with more
            // upstream still pending — pull again so a single `fetch`
            // call still returns something when there is more to give.
        }
    }

    fn clone_stream(&self) -> Box<dyn Stream> {
        Box::new(Offset::new(self.upstream.clone_stream(), self.n))
    }
}
