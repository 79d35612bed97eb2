//! [Random]: reservoir sampling with capacity k (spec §4.6).
//!
//! The sample can't be known until the source is exhausted, so every
//! `fetch` call buffers into the reservoir and reports `HasMore`; the
//! sampled rows are only emitted from the `finish` hook.

use parking_lot::Mutex;
use rand::Rng;

use super::{FetchStatus, Stream, TransformerCore};
use crate::concurrency::Job;
use crate::error::Fallible;
use crate::value::{Column, OrderedSet, Row};

struct ReservoirState {
    sample: Vec<Row>,
    seen: u64,
}

/// Guards the sample buffer and seen counter (spec §5); fed
/// concurrently only if the upstream hands batches to more than one
/// caller, which a well-behaved [crate::concurrency::StreamPuller]
/// never does for a single consumer.
pub struct Random {
    upstream: Box<dyn Stream>,
    k: usize,
    state: Mutex<ReservoirState>,
    core: TransformerCore,
}

impl Random {
    pub fn new(upstream: Box<dyn Stream>, k: usize) -> Random {
        Random {
            upstream,
            k,
            state: Mutex::new(ReservoirState { sample: Vec::with_capacity(k), seen: 0 }),
            core: TransformerCore::new(),
        }
    }

    /// Algorithm R: the first k items fill the reservoir outright;
    /// every subsequent item (the `seen`-th overall) replaces a
    /// uniformly chosen slot with probability k/seen, so after N items
    /// every one has been kept with probability min(1, k/N).
    fn absorb(&self, rows: Vec<Row>) {
        let mut state = self.state.lock();
        let mut rng = rand::thread_rng();
        for row in rows {
            state.seen += 1;
            if state.sample.len() < self.k {
                state.sample.push(row);
            } else if self.k > 0 {
                let j = rng.gen_range(0..state.seen);
                if j < self.k as u64 {
                    state.sample[j as usize] = row;
                }
            }
        }
    }
}

impl Stream for Random {
    fn columns(&self, job: &Job) -> OrderedSet<Column> {
        self.upstream.columns(job)
    }

    fn fetch(&self, job: &Job) -> Fallible<(Vec<Row>, FetchStatus)> {
        self.core.report_start(job);
        let (rows, status) = self.upstream.fetch(job)?;
        self.absorb(rows);

        if status == FetchStatus::Finished && self.core.take_finish() {
            let sample = std::mem::take(&mut self.state.lock().sample);
            self.core.report_done(job);
            return Ok((sample, FetchStatus::Finished));
        }
        if status == FetchStatus::Finished {
            return Ok((Vec::new(), FetchStatus::Finished));
        }
        Ok((Vec::new(), FetchStatus::HasMore))
    }

    fn clone_stream(&self) -> Box<dyn Stream> {
        Box::new(Random::new(self.upstream.clone_stream(), self.k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::RowSource;
    use crate::value::Value;
    use std::sync::Arc;

    #[test]
    fn sample_size_is_min_of_capacity_and_input_size() {
        let columns: OrderedSet<Column> = ["x"].iter().map(|s| Column::new(*s)).collect();
        let shared = Arc::new(columns.clone());
        let rows: Vec<Row> = (0..20).map(|i| Row::new(shared.clone(), vec![Value::Int(i)])).collect();
        let source = RowSource::new(columns, rows).with_batch_size(4);
        let sampler = Random::new(Box::new(source), 5);
        let job = Job::root();

        let mut last = Vec::new();
        loop {
            let (batch, status) = sampler.fetch(&job).unwrap();
            if !batch.is_empty() {
                last = batch;
            }
            if status == FetchStatus::Finished {
                break;
            }
        }
        assert_eq!(last.len(), 5);
    }

    #[test]
    fn sample_smaller_than_capacity_when_input_is_smaller() {
        let columns: OrderedSet<Column> = ["x"].iter().map(|s| Column::new(*s)).collect();
        let shared = Arc::new(columns.clone());
        let rows: Vec<Row> = (0..3).map(|i| Row::new(shared.clone(), vec![Value::Int(i)])).collect();
        let source = RowSource::new(columns, rows);
        let sampler = Random::new(Box::new(source), 10);
        let job = Job::root();

        let mut last = Vec::new();
        loop {
            let (batch, status) = sampler.fetch(&job).unwrap();
            if !batch.is_empty() {
                last = batch;
            }
            if status == FetchStatus::Finished {
                break;
            }
        }
        assert_eq!(last.len(), 3);
    }
}
