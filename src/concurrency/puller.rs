//! [StreamPuller]: keeps W fetches in flight and reorders their
//! results back into the sequence the source assigned them (spec §4.1).

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::job::{Job, Qos};

pub type WavefrontId = u64;

/// A source a [StreamPuller] can pull wavefronts from. `fetch` may be
/// called concurrently from up to `width` threads at once; it must not
/// assume calls arrive in wavefront order.
pub trait Source<T, E>: Send + Sync {
    /// Fetches the next batch. `Ok(None)` means the source is exhausted.
    fn fetch(&self) -> Result<Option<T>, E>;
}

struct Shared<T, E> {
    next_to_dispatch: WavefrontId,
    next_to_deliver: WavefrontId,
    in_flight: usize,
    width: usize,
    buffered: BTreeMap<WavefrontId, T>,
    /// Set to the id of the first wavefront that came back empty; no
    /// wavefront at or after this id carries an item.
    exhausted_at: Option<WavefrontId>,
    error: Option<E>,
    finished: bool,
}

impl<T, E> Shared<T, E> {
    fn is_drained_up_to_next_deliver(&self) -> bool {
        !self.buffered.contains_key(&self.next_to_deliver)
    }
}

/// Maintains up to `width` in-flight wavefronts (width ≈ host CPU
/// count), each tagged with a monotonically increasing id, and
/// delivers results to the consumer strictly in id order, buffering
/// whichever wavefronts return out of turn.
pub struct StreamPuller {
    job: Job,
    width: usize,
}

impl StreamPuller {
    pub fn new(job: Job, width: usize) -> StreamPuller {
        StreamPuller {
            job,
            width: width.max(1),
        }
    }

    /// Host-CPU-sized puller, matching the width [Job::root]'s thread
    /// pool is built with.
    pub fn for_host(job: Job) -> StreamPuller {
        let width = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        StreamPuller::new(job, width)
    }

    /// Drives `source` to completion, calling `on_item` once per item in
    /// wavefront order, then exactly one of `on_done` or `on_error`.
    pub fn pull<T, E, S, OnItem, OnDone, OnError>(
        &self,
        source: Arc<S>,
        on_item: OnItem,
        on_done: OnDone,
        on_error: OnError,
    ) where
        T: Send + 'static,
        E: Send + 'static,
        S: Source<T, E> + 'static,
        OnItem: Fn(T) + Send + Sync + 'static,
        OnDone: FnOnce() + Send + 'static,
        OnError: FnOnce(E) + Send + 'static,
    {
        let shared = Arc::new(Mutex::new(Shared {
            next_to_dispatch: 0,
            next_to_deliver: 0,
            in_flight: 0,
            width: self.width,
            buffered: BTreeMap::new(),
            exhausted_at: None,
            error: None,
            finished: false,
        }));
        let on_item = Arc::new(on_item);
        let on_done = Arc::new(Mutex::new(Some(on_done)));
        let on_error = Arc::new(Mutex::new(Some(on_error)));

        dispatch_more(&self.job, &shared, &source, &on_item, &on_done, &on_error);
    }
}

fn dispatch_more<T, E, S, OnItem, OnDone, OnError>(
    job: &Job,
    shared: &Arc<Mutex<Shared<T, E>>>,
    source: &Arc<S>,
    on_item: &Arc<OnItem>,
    on_done: &Arc<Mutex<Option<OnDone>>>,
    on_error: &Arc<Mutex<Option<OnError>>>,
) where
    T: Send + 'static,
    E: Send + 'static,
    S: Source<T, E> + 'static,
    OnItem: Fn(T) + Send + Sync + 'static,
    OnDone: FnOnce() + Send + 'static,
    OnError: FnOnce(E) + Send + 'static,
{
    loop {
        let id = {
            let mut state = shared.lock();
            if state.finished
                || state.error.is_some()
                || state.exhausted_at.is_some()
                || state.in_flight >= state.width
            {
                break;
            }
            let id = state.next_to_dispatch;
            state.next_to_dispatch += 1;
            state.in_flight += 1;
            id
        };

        let shared = shared.clone();
        let source = source.clone();
        let job_for_child = job.clone();
        let on_item = on_item.clone();
        let on_done = on_done.clone();
        let on_error = on_error.clone();
        job.spawn(Qos::UserInitiated, move || {
            let result = source.fetch();
            on_wavefront_complete(
                &job_for_child,
                id,
                result,
                &shared,
                &source,
                &on_item,
                &on_done,
                &on_error,
            );
        });
    }
}

#[allow(clippy::too_many_arguments)]
fn on_wavefront_complete<T, E, S, OnItem, OnDone, OnError>(
    job: &Job,
    id: WavefrontId,
    result: Result<Option<T>, E>,
    shared: &Arc<Mutex<Shared<T, E>>>,
    source: &Arc<S>,
    on_item: &Arc<OnItem>,
    on_done: &Arc<Mutex<Option<OnDone>>>,
    on_error: &Arc<Mutex<Option<OnError>>>,
) where
    T: Send + 'static,
    E: Send + 'static,
    S: Source<T, E> + 'static,
    OnItem: Fn(T) + Send + Sync + 'static,
    OnDone: FnOnce() + Send + 'static,
    OnError: FnOnce(E) + Send + 'static,
{
    {
        let mut state = shared.lock();
        state.in_flight -= 1;
        match result {
            Ok(Some(item)) => {
                state.buffered.insert(id, item);
            }
            Ok(None) => {
                let earliest = state.exhausted_at.map_or(id, |e| e.min(id));
                state.exhausted_at = Some(earliest);
            }
            Err(err) => {
                if state.error.is_none() {
                    state.error = Some(err);
                }
            }
        }
    }

    deliver_in_order(shared, on_item);

    let outcome = {
        let mut state = shared.lock();
        if state.finished {
            None
        } else if state.error.is_some() && state.is_drained_up_to_next_deliver() {
            state.finished = true;
            Some(Err(state.error.take().unwrap()))
        } else if state.exhausted_at == Some(state.next_to_deliver) && state.in_flight == 0 {
            state.finished = true;
            Some(Ok(()))
        } else {
            None
        }
    };

    match outcome {
        Some(Ok(())) => {
            if let Some(done) = on_done.lock().take() {
                done();
            }
        }
        Some(Err(err)) => {
            if let Some(error_cb) = on_error.lock().take() {
                error_cb(err);
            }
        }
        None => {
            dispatch_more(job, shared, source, on_item, on_done, on_error);
        }
    }
}

fn deliver_in_order<T, E, OnItem>(shared: &Arc<Mutex<Shared<T, E>>>, on_item: &Arc<OnItem>)
where
    OnItem: Fn(T) + Send + Sync + 'static,
{
    loop {
        let next = {
            let mut state = shared.lock();
            let id = state.next_to_deliver;
            match state.buffered.remove(&id) {
                Some(item) => {
                    state.next_to_deliver += 1;
                    Some(item)
                }
                None => None,
            }
        };
        match next {
            Some(item) => on_item(item),
            None => break,
        }
    }
}
