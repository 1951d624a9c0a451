// This file is part of strand, a stackful fiber runtime.
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A bounded-queue worker-thread pool.
//!
//! This is the one genuinely multi-threaded component of the crate. It uses
//! ordinary OS synchronization; the cooperative fiber primitives must never
//! be shared across its worker threads.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;

use thiserror::Error;

/// An error raised at [`Distributor`] construction.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DistributorError {
    #[error("distributor needs at least one worker thread")]
    ZeroConcurrency,
}

struct State<T> {
    items: VecDeque<T>,
    done: bool,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    // One condition variable multiplexes "item available" and "space
    // available"; both sides re-check their predicate in a loop.
    signal: Condvar,
    capacity: usize,
}

/// A fixed-size thread pool draining a capacity-bounded queue of work
/// items.
///
/// [`submit`](Distributor::submit) blocks while the queue is at capacity
/// (`concurrency * max_items_per_thread`; zero disables the bound). Dropping
/// the distributor drains whatever is still queued and joins every worker:
/// no item submitted before shutdown is dropped.
pub struct Distributor<T: Send + 'static> {
    shared: Arc<Shared<T>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl<T: Send + 'static> Distributor<T> {
    /// Spawns `concurrency` worker threads, each applying `process` to the
    /// items it pops.
    ///
    /// A `process` that panics kills its own worker thread and nothing
    /// else; fault containment inside the processing function is its own
    /// concern.
    pub fn new<F>(
        process: F,
        max_items_per_thread: usize,
        concurrency: usize,
    ) -> Result<Distributor<T>, DistributorError>
    where
        F: Fn(T) + Send + Clone + 'static,
    {
        if concurrency == 0 {
            return Err(DistributorError::ZeroConcurrency);
        }
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                items: VecDeque::new(),
                done: false,
            }),
            signal: Condvar::new(),
            capacity: concurrency * max_items_per_thread,
        });
        let workers = (0..concurrency)
            .map(|_| {
                let shared = Arc::clone(&shared);
                let process = process.clone();
                thread::spawn(move || consume(&shared, process))
            })
            .collect();
        Ok(Distributor { shared, workers })
    }

    /// Like [`new`](Distributor::new), with the thread count defaulted to
    /// the available hardware parallelism.
    pub fn with_available_parallelism<F>(
        process: F,
        max_items_per_thread: usize,
    ) -> Result<Distributor<T>, DistributorError>
    where
        F: Fn(T) + Send + Clone + 'static,
    {
        let concurrency = thread::available_parallelism()
            .map(usize::from)
            .unwrap_or(1);
        Distributor::new(process, max_items_per_thread, concurrency)
    }

    /// Queues an item, blocking while the queue is at capacity, and wakes
    /// one worker.
    pub fn submit(&self, item: T) {
        let mut state = lock(&self.shared.state);
        if self.shared.capacity > 0 {
            while state.items.len() >= self.shared.capacity {
                state = wait(&self.shared.signal, state);
            }
        }
        state.items.push_back(item);
        // One condvar carries both "item available" and "space available"
        // wakeups, so a single wake can land on the wrong side and be
        // consumed without effect. Broadcast; the predicates sort it out.
        self.shared.signal.notify_all();
    }
}

impl<T: Send + 'static> Drop for Distributor<T> {
    fn drop(&mut self) {
        lock(&self.shared.state).done = true;
        self.shared.signal.notify_all();
        for worker in self.workers.drain(..) {
            // A worker that panicked in its processing function has already
            // made its noise; teardown still joins the rest.
            let _ = worker.join();
        }
    }
}

fn consume<T, F>(shared: &Shared<T>, process: F)
where
    F: Fn(T),
{
    let mut state = lock(&shared.state);
    loop {
        if let Some(item) = state.items.pop_front() {
            // Space was freed. Broadcast for the same reason `submit` does:
            // a single wake could land on an idle worker instead of a
            // blocked producer and be lost.
            shared.signal.notify_all();
            drop(state);
            process(item);
            state = lock(&shared.state);
        } else if state.done {
            break;
        } else {
            state = wait(&shared.signal, state);
        }
    }
}

// A panicking worker poisons the mutex while holding no broken invariant of
// ours (the queue is only touched under short, panic-free sections), so the
// poison flag is ignored rather than propagated.
fn lock<T>(mutex: &Mutex<State<T>>) -> MutexGuard<'_, State<T>> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn wait<'a, T>(signal: &Condvar, guard: MutexGuard<'a, State<T>>) -> MutexGuard<'a, State<T>> {
    signal.wait(guard).unwrap_or_else(PoisonError::into_inner)
}
