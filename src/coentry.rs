// This file is part of strand, a stackful fiber runtime.
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The entry trampoline bridging a raw context switch into a fiber's
//! callable.

use std::panic::{self, AssertUnwindSafe};
use std::process;
use std::ptr;
use std::rc::Weak;

use log::trace;

use crate::context::Context;
use crate::fiber::{Exec, FiberInner, Status, StopSignal};
use crate::stack::Stack;

/// The run-once trampoline payload, emplaced on the fiber's own stack
/// rather than the heap.
pub(crate) struct Coentry<F: FnOnce(&Exec)> {
    function: F,
    fiber: Weak<FiberInner>,
}

impl<F> Coentry<F>
where
    F: FnOnce(&Exec) + 'static,
{
    /// Places the payload on `stack`, above where the fiber's frames will
    /// grow.
    ///
    /// # Safety
    ///
    /// Same contract as [`Stack::emplace`]; destruction passes to the
    /// trampoline on first entry, or to [`drop_erased`](Coentry::drop_erased)
    /// if the fiber never runs.
    pub(crate) unsafe fn emplace(
        stack: &mut Stack,
        function: F,
        fiber: Weak<FiberInner>,
    ) -> *mut Coentry<F> {
        stack.emplace(Coentry { function, fiber })
    }

    /// Destroys a never-claimed payload in place.
    ///
    /// # Safety
    ///
    /// `payload` must be a pointer obtained from [`emplace`](Coentry::emplace)
    /// for this same `F`, and the trampoline must never have run.
    pub(crate) unsafe fn drop_erased(payload: *mut ()) {
        ptr::drop_in_place(payload as *mut Coentry<F>);
    }

    /// The fiber entry point: invoked by the first context switch onto the
    /// fiber's stack, with the payload address as argument.
    ///
    /// It runs the callable at most once, records how the run ended, wakes
    /// everything parked on the fiber's completion condition, and switches
    /// back to the caller without ever returning.
    pub(crate) unsafe extern "C" fn cocall(payload: usize) -> ! {
        // Move the payload off its stack slot; the slot is dead from here
        // on and must not be destroyed again by the release path.
        let Coentry { function, fiber } = ptr::read(payload as *mut Coentry<F>);
        let inner = fiber
            .upgrade()
            .expect("fiber state released while its first resume is in flight");
        // This frame is never unwound, so the weak reference must not be
        // left alive in it.
        drop(fiber);
        inner.claim_payload();
        let exec = Exec::from_inner(inner);

        let outcome = if exec.status() == Status::Stopped {
            // Canceled before it ever ran: finish without invoking the
            // callable at all.
            drop(function);
            Ok(())
        } else {
            exec.inner.set_status(Status::Running);
            panic::catch_unwind(AssertUnwindSafe(|| function(&exec)))
        };

        match outcome {
            Ok(()) => {}
            Err(fault) if fault.is::<StopSignal>() => {
                // Cooperative stop: a clean termination, not a fault.
                trace!("{} stopped", exec.inner.annotation());
            }
            Err(fault) => {
                // Delivered to whichever resume call saw this run finish.
                exec.inner.set_fault(fault);
            }
        }

        exec.inner.set_status(Status::Finishing);
        exec.inner.completion().signal(&exec);
        exec.inner.set_status(Status::Finished);

        trace!("{} finished", exec.inner.annotation());

        // Switch back to the caller for the last time. This frame is never
        // unwound, so every strong reference it holds must be released
        // before the switch.
        let context = exec.inner.context();
        let caller_context = exec
            .inner
            .caller_context()
            .expect("finishing fiber has no caller to return to");
        drop(exec);
        Context::swap(context, caller_context);

        // There is no continuation to switch back into.
        process::abort();
    }
}
