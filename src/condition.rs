// This file is part of strand, a stackful fiber runtime.
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use log::warn;

use crate::fiber::{Exec, FiberInner, Resumed, Status};

/// A fiber-level parking/wakeup primitive: fibers [`wait`](Condition::wait)
/// on it and are woken by a later [`signal`](Condition::signal).
///
/// This is a cooperative, single-threaded primitive, distinct from the OS
/// condition variables the [`Distributor`](crate::Distributor) uses; it must
/// never be shared across threads (and, holding `Rc`s, cannot be).
///
/// Wake order is not a contract (the queue drains LIFO), but every
/// distinct waiter is woken exactly once per signal sweep, except entries
/// that are already finished or gone by the time their turn comes, which
/// are skipped.
///
/// Dropping a `Condition` never silently abandons a parked fiber: anything
/// still waiting is forcibly stopped, so its stack unwinds, rather than
/// resumed normally.
pub struct Condition {
    waiting: RefCell<Vec<Weak<FiberInner>>>,
}

impl Condition {
    pub fn new() -> Condition {
        Condition {
            waiting: RefCell::new(Vec::new()),
        }
    }

    /// Parks `current` until a signal resumes it.
    ///
    /// Must be called from a fiber with a resume outstanding: the main
    /// context has no caller to yield to.
    pub fn wait(&self, current: &Exec) {
        self.waiting.borrow_mut().push(Rc::downgrade(&current.inner));
        current.yield_now();
    }

    /// Drains the waiting queue, resuming each parked fiber in turn.
    /// Fibers that park during the sweep are drained by the same sweep.
    ///
    /// Wakeups carry no payload: a fault from a woken fiber is logged and
    /// discarded here, not forwarded.
    pub fn signal(&self, current: &Exec) {
        loop {
            let next = self.waiting.borrow_mut().pop();
            let Some(waiter) = next else { break };
            let Some(waiter) = waiter.upgrade() else {
                continue;
            };
            if waiter.status() == Status::Finished {
                continue;
            }
            if let Resumed::Faulted(_) = waiter.resume(current) {
                warn!(
                    "discarding fault from fiber {} woken by condition",
                    waiter.annotation()
                );
            }
        }
    }

    /// The number of currently parked fibers. Observability only.
    pub fn count(&self) -> usize {
        self.waiting.borrow().len()
    }
}

impl Default for Condition {
    fn default() -> Condition {
        Condition::new()
    }
}

impl Drop for Condition {
    fn drop(&mut self) {
        if self.waiting.get_mut().is_empty() {
            return;
        }
        let root = Exec::sentinel("condition-teardown");
        while let Some(waiter) = self.waiting.get_mut().pop() {
            let Some(waiter) = waiter.upgrade() else {
                continue;
            };
            if waiter.status() == Status::Finished {
                continue;
            }
            waiter.set_status(Status::Stopped);
            if let Resumed::Faulted(_) = waiter.resume(&root) {
                warn!(
                    "discarding fault raised while stopping parked fiber {}",
                    waiter.annotation()
                );
            }
        }
    }
}
