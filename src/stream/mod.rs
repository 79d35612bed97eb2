//! The pull-based streaming dataflow engine: [Stream], [Transformer],
//! and the concrete transformers that implement the Dataset operator
//! surface in-process (spec §4.3-§4.6).

mod aggregate;
mod calculate;
mod columns;
mod filter;
mod flatten;
mod join;
mod limit;
mod offset;
mod random;
mod rows;
mod union;

pub use aggregate::Aggregate;
pub use calculate::Calculate;
pub use columns::Columns;
pub use filter::Filter;
pub use flatten::Flatten;
pub use join::{Join, JoinKind, JoinSource};
pub use limit::Limit;
pub use offset::Offset;
pub use random::Random;
pub use rows::RowSource;
pub use union::Union;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::concurrency::Job;
use crate::error::Fallible;
use crate::value::{Column, OrderedSet, Row};

/// The binary completion status a single [Stream::fetch] reports.
/// `Finished` implies no further call to `fetch` will produce rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    HasMore,
    Finished,
}

/// A pull-based source of [Row] batches. `fetch` may be called
/// concurrently; implementations that don't serialise internally make
/// no promise about cross-call batch ordering, which is why consumers
/// that need strict ordering go through [crate::concurrency::StreamPuller]
/// instead of calling `fetch` directly.
pub trait Stream: Send + Sync {
    fn columns(&self, job: &Job) -> OrderedSet<Column>;

    /// Delivers exactly one batch per call.
    fn fetch(&self, job: &Job) -> Fallible<(Vec<Row>, FetchStatus)>;

    /// A fresh stream positioned at the start, independent of `self`'s
    /// progress through its own source.
    fn clone_stream(&self) -> Box<dyn Stream>;
}

fn next_transformer_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// Shared bookkeeping every concrete transformer embeds: a stable
/// identity for progress reporting, and the "finish hook fires exactly
/// once" guarantee used by Random and Aggregate to emit deferred rows
/// when the upstream finishes (spec §4.3).
pub struct TransformerCore {
    id: u64,
    started: AtomicBool,
    finished: AtomicBool,
}

impl TransformerCore {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn new() -> TransformerCore {
        TransformerCore { id: next_transformer_id(), started: AtomicBool::new(false), finished: AtomicBool::new(false) }
    }

    /// Reports 0.0 once, the first time this transformer is driven.
    pub fn report_start(&self, job: &Job) {
        if !self.started.swap(true, Ordering::SeqCst) {
            log::debug!("transformer {} starting", self.id);
            job.report_progress(0.0, self.id);
        }
    }

    pub fn report_done(&self, job: &Job) {
        log::debug!("transformer {} done", self.id);
        job.report_progress(1.0, self.id);
    }

    /// Returns `true` exactly once across the lifetime of this
    /// transformer — the caller that gets `true` is the one that must
    /// run the deferred-emission `finish` logic.
    pub fn take_finish(&self) -> bool {
        !self.finished.swap(true, Ordering::SeqCst)
    }
}

impl Default for TransformerCore {
    fn default() -> Self {
        TransformerCore::new()
    }
}

/// Helper used by every concrete transformer's `fetch`: mints a fresh
/// schema `Arc` once, since batches sharing a schema pointer let [Row]
/// reuse its lazily-built name→index map.
pub fn shared_schema(columns: OrderedSet<Column>) -> Arc<OrderedSet<Column>> {
    Arc::new(columns)
}
