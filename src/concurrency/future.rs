//! [Future]: a single-compute, multi-await value.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::job::{Job, Qos};

type Waiter<T> = Box<dyn FnOnce(T) + Send>;

enum State<T> {
    /// Producer has not yet run, or has not yet called back; holds
    /// every waiter registered so far.
    Pending(Vec<Waiter<T>>),
    Ready(T),
    Cancelled,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    /// Once set, new `await_result` calls on a still-[State::Pending]
    /// future are refused; existing waiters are left untouched.
    expired: AtomicBool,
}

/// Guarantees (spec §4.1): exactly one producer invocation across all
/// waiters; a waiter enqueued before completion is delivered the result
/// once it's ready; a waiter enqueued after completion is delivered
/// immediately; `cancel` drops all waiters; `expire` blocks further
/// registration without dropping existing waiters; satisfying an
/// already-satisfied Future is a programming error (it panics).
pub struct Future<T: Clone + Send + 'static> {
    inner: Arc<Inner<T>>,
}

impl<T: Clone + Send + 'static> Clone for Future<T> {
    fn clone(&self) -> Self {
        Future {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Future<T> {
    /// Schedules `producer` on `job`'s queue; its result satisfies this
    /// Future exactly once.
    pub fn new<F>(job: &Job, producer: F) -> Future<T>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let future = Future {
            inner: Arc::new(Inner {
                state: Mutex::new(State::Pending(Vec::new())),
                expired: AtomicBool::new(false),
            }),
        };
        let satisfied = future.clone();
        job.spawn(Qos::UserInitiated, move || {
            let value = producer();
            satisfied.satisfy(value);
        });
        future
    }

    /// Registers `on_ready`. Returns `true` if it was (or will be)
    /// delivered, `false` if registration was refused because the
    /// Future had already expired while still pending.
    pub fn await_result(&self, on_ready: impl FnOnce(T) + Send + 'static) -> bool {
        let mut state = self.inner.state.lock();
        match &mut *state {
            State::Ready(value) => {
                let value = value.clone();
                drop(state);
                on_ready(value);
                true
            }
            State::Cancelled => false,
            State::Pending(waiters) => {
                if self.inner.expired.load(Ordering::SeqCst) {
                    false
                } else {
                    waiters.push(Box::new(on_ready));
                    true
                }
            }
        }
    }

    /// Delivers `value` to every registered waiter, then becomes Ready.
    /// Calling this twice (or after cancel) is a programming error.
    fn satisfy(&self, value: T) {
        let waiters = {
            let mut state = self.inner.state.lock();
            match std::mem::replace(&mut *state, State::Ready(value.clone())) {
                State::Pending(waiters) => waiters,
                State::Ready(_) | State::Cancelled => {
                    panic!("Future satisfied more than once")
                }
            }
        };
        for waiter in waiters {
            waiter(value.clone());
        }
    }

    /// Drops every registered waiter and marks the Future as cancelled;
    /// later `await_result` calls are refused.
    pub fn cancel(&self) {
        let mut state = self.inner.state.lock();
        *state = State::Cancelled;
    }

    /// Blocks further waiter registration while the Future is still
    /// pending; existing waiters are left in place and will still fire
    /// once the producer completes.
    pub fn expire(&self) {
        self.inner.expired.store(true, Ordering::SeqCst);
    }

    /// Expires this Future after `limit`, on `job`'s queue.
    pub fn expire_after(&self, job: &Job, limit: Duration) {
        let expiring = self.clone();
        job.spawn(Qos::Background, move || {
            std::thread::sleep(limit);
            expiring.expire();
        });
    }

    pub fn is_ready(&self) -> bool {
        matches!(&*self.inner.state.lock(), State::Ready(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn delivers_to_waiters_registered_before_and_after_completion() {
        let job = Job::root();
        let future = Future::new(&job, || 42);

        let (tx1, rx1) = mpsc::channel();
        future.await_result(move |v| tx1.send(v).unwrap());
        let early = rx1.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(early, 42);

        let (tx2, rx2) = mpsc::channel();
        future.await_result(move |v| tx2.send(v).unwrap());
        let late = rx2.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(late, 42);
    }

    #[test]
    fn expire_blocks_new_registration_but_not_existing_waiters() {
        let job = Job::root();
        let (tx_gate, rx_gate) = mpsc::channel::<()>();
        let (tx_done, rx_done) = mpsc::channel();
        let future: Future<i32> = Future::new(&job, move || {
            rx_gate.recv().unwrap();
            7
        });

        let tx_done2 = tx_done.clone();
        assert!(future.await_result(move |v| tx_done2.send(v).unwrap()));

        future.expire();
        assert!(!future.await_result(move |v| tx_done.send(v).unwrap()));

        tx_gate.send(()).unwrap();
        let value = rx_done.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    #[should_panic(expected = "satisfied more than once")]
    fn double_satisfy_is_a_programming_error() {
        let future: Future<i32> = Future {
            inner: Arc::new(Inner {
                state: Mutex::new(State::Ready(1)),
                expired: AtomicBool::new(false),
            }),
        };
        future.satisfy(2);
    }
}
