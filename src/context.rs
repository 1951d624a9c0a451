// This file is part of strand, a stackful fiber runtime.
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::ptr;

use crate::arch::{self, StackPointer};
use crate::stack::Stack;

/// A resumable execution point: a [`Stack`] bound to a saved machine state.
///
/// It can be swapped into and out of with [`swap`](Context::swap). A context
/// with no explicit stack, made by [`main`](Context::main), represents the
/// ambient execution context of a thread: it borrows the thread's own
/// stack and is only ever written to by a swap away from it.
///
/// Every operation is unsafe, because no guarantees can be made about the
/// state of the context; [`Fiber`](crate::Fiber) layers the lifecycle
/// checks on top.
#[derive(Debug)]
pub struct Context {
    stack: Stack,
    stack_ptr: StackPointer,
}

impl Context {
    /// Binds `stack` to an entry trampoline so that the first swap into the
    /// context calls `entry(arg)`.
    ///
    /// The frame is built below the stack's *current* cursor, so anything
    /// already emplaced above it stays untouched while the running fiber's
    /// frames grow away from it.
    ///
    /// # Safety
    ///
    /// `entry` must never return: it has no frame to return into. The stack
    /// must have usable space left below its cursor.
    pub unsafe fn new(
        stack: Stack,
        entry: unsafe extern "C" fn(usize) -> !,
        arg: usize,
    ) -> Context {
        let sp = (stack.current() as usize & !(Stack::ALIGNMENT - 1)) as *mut u8;
        let stack_ptr = arch::init(sp, entry, arg);
        Context { stack, stack_ptr }
    }

    /// The sentinel for a thread's ambient execution context.
    pub fn main() -> Context {
        Context {
            stack: Stack::empty(),
            stack_ptr: StackPointer::null(),
        }
    }

    /// Switches to `to`, saving the running execution through `from`.
    /// Control comes back when a later swap targets `from`.
    ///
    /// # Safety
    ///
    /// `from` must be the context actually executing this call and `to`
    /// must be suspended (or fresh); both must stay alive and pinned until
    /// the switch in each direction has completed.
    pub unsafe fn swap(from: *mut Context, to: *const Context) {
        arch::swap(
            ptr::addr_of_mut!((*from).stack_ptr),
            ptr::addr_of!((*to).stack_ptr),
        )
    }

    /// The stack this context switches onto.
    pub fn stack(&self) -> &Stack {
        &self.stack
    }
}
