// This file is part of strand, a stackful fiber runtime.
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::cell::RefCell;

use log::warn;

use crate::fiber::{Exec, Fiber, Resumed};
use crate::stack::{Stack, StackError};

/// A container that owns fibers and their stacks on the caller's behalf.
///
/// [`resume`](Pool::resume) constructs a fiber inside the pool's own
/// storage, so it outlives the call without the caller holding it. When the
/// pool goes out of scope it releases every fiber it owns; any that are
/// still running are stopped first, per [`Fiber`]'s own drop contract.
pub struct Pool {
    stack_size: usize,
    fibers: RefCell<Vec<Fiber>>,
}

impl Pool {
    /// A pool allocating [`Fiber::DEFAULT_STACK_SIZE`] stacks.
    pub fn new() -> Pool {
        Pool::with_stack_size(Fiber::DEFAULT_STACK_SIZE)
    }

    pub fn with_stack_size(stack_size: usize) -> Pool {
        Pool {
            stack_size,
            fibers: RefCell::new(Vec::new()),
        }
    }

    /// Constructs a fiber bound to `f` in the pool's storage, resumes it
    /// once, and returns a handle to it.
    ///
    /// Pool fibers are fire-and-forget: a fault from that first run is
    /// logged and discarded.
    pub fn resume<F>(&self, current: &Exec, f: F) -> Result<Exec, StackError>
    where
        F: FnOnce(&Exec) + 'static,
    {
        let stack = Stack::new(self.stack_size)?;
        let fiber = Fiber::with_stack(stack, f);
        let exec = fiber.exec();
        if let Resumed::Faulted(_) = fiber.resume(current) {
            warn!("discarding fault from pooled fiber");
        }
        self.fibers.borrow_mut().push(fiber);
        Ok(exec)
    }

    /// The number of fibers the pool has created and still owns.
    pub fn len(&self) -> usize {
        self.fibers.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.fibers.borrow().is_empty()
    }
}

impl Default for Pool {
    fn default() -> Pool {
        Pool::new()
    }
}
