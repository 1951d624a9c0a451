// This file is part of strand, a stackful fiber runtime.
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Fibers: the coroutine object and its lifecycle state machine.

use std::any::Any;
use std::cell::{Cell, RefCell, UnsafeCell};
use std::fmt;
use std::panic;
use std::ptr;
use std::rc::{Rc, Weak};

use log::{trace, warn};

use crate::coentry::Coentry;
use crate::condition::Condition;
use crate::context::Context;
use crate::stack::{Stack, StackError};

/// Where a fiber is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The ambient execution context of a thread; never constructed for a
    /// user fiber.
    Main,
    /// Constructed but never run.
    Ready,
    /// The fiber has started and has not finished. It keeps this status
    /// while suspended.
    Running,
    /// A stop has been requested; the fiber's next suspension point raises
    /// the stop unwind instead of continuing.
    Stopped,
    /// The fiber's callable has returned or faulted and its completion
    /// signal is being delivered.
    Finishing,
    /// Terminal. Resuming a finished fiber is a fatal logic error.
    Finished,
}

/// The panic payload captured from a fiber's callable.
pub type Fault = Box<dyn Any + Send + 'static>;

// The cooperative-stop unwind payload. It is raised at a stopped fiber's
// suspension point and swallowed by the trampoline; it never escapes to the
// resumer.
pub(crate) struct StopSignal;

/// The outcome of a [`Fiber::resume`] call.
///
/// Faults are not re-raised in the resuming context; they come back as a
/// value here, preserving call-like fault semantics across the switch
/// boundary without conflating them with the control-flow stop unwind.
/// Callers that do want the panic to continue can use
/// [`propagate`](Resumed::propagate).
#[must_use = "a resume outcome may carry a captured fault"]
pub enum Resumed {
    /// The fiber yielded and can be resumed again.
    Suspended,
    /// The fiber ran to completion, including completion via a stop.
    Finished,
    /// The fiber's callable panicked; it is now finished and this is the
    /// payload, delivered to the resumer verbatim.
    Faulted(Fault),
}

impl Resumed {
    pub fn is_suspended(&self) -> bool {
        matches!(self, Resumed::Suspended)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Resumed::Finished)
    }

    pub fn is_faulted(&self) -> bool {
        matches!(self, Resumed::Faulted(_))
    }

    /// Re-raises a captured fault in the calling context; passes the other
    /// outcomes through.
    pub fn propagate(self) -> Resumed {
        match self {
            Resumed::Faulted(fault) => panic::resume_unwind(fault),
            other => other,
        }
    }
}

impl fmt::Debug for Resumed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resumed::Suspended => f.write_str("Suspended"),
            Resumed::Finished => f.write_str("Finished"),
            Resumed::Faulted(_) => f.write_str("Faulted(..)"),
        }
    }
}

/// The shared state behind [`Fiber`] and [`Exec`] handles.
pub(crate) struct FiberInner {
    status: Cell<Status>,
    annotation: RefCell<String>,
    context: UnsafeCell<Context>,
    // The execution context that invoked `resume`. Set only while that
    // resume is outstanding; it is the unique path back out.
    caller: RefCell<Option<Rc<FiberInner>>>,
    fault: Cell<Option<Fault>>,
    completion: Condition,
    // The coentry payload emplaced on the fiber's own stack, null once the
    // trampoline has claimed it. `drop_payload` destroys it in place if the
    // fiber is released without ever running.
    payload: Cell<*mut ()>,
    drop_payload: Option<unsafe fn(*mut ())>,
}

impl FiberInner {
    fn sentinel(annotation: &str) -> Rc<FiberInner> {
        Rc::new(FiberInner {
            status: Cell::new(Status::Main),
            annotation: RefCell::new(annotation.to_string()),
            context: UnsafeCell::new(Context::main()),
            caller: RefCell::new(None),
            fault: Cell::new(None),
            completion: Condition::new(),
            payload: Cell::new(ptr::null_mut()),
            drop_payload: None,
        })
    }

    pub(crate) fn status(&self) -> Status {
        self.status.get()
    }

    pub(crate) fn set_status(&self, status: Status) {
        self.status.set(status);
    }

    pub(crate) fn annotation(&self) -> String {
        self.annotation.borrow().clone()
    }

    pub(crate) fn context(&self) -> *mut Context {
        self.context.get()
    }

    pub(crate) fn completion(&self) -> &Condition {
        &self.completion
    }

    pub(crate) fn set_fault(&self, fault: Fault) {
        self.fault.set(Some(fault));
    }

    pub(crate) fn claim_payload(&self) {
        self.payload.set(ptr::null_mut());
    }

    pub(crate) fn caller_context(&self) -> Option<*mut Context> {
        self.caller.borrow().as_ref().map(|caller| caller.context.get())
    }

    /// Switches from `current` into this fiber and reports how the run
    /// ended. The caller link is set for the duration of the switch.
    pub(crate) fn resume(self: &Rc<Self>, current: &Exec) -> Resumed {
        assert!(
            self.status.get() != Status::Finished,
            "cannot resume a finished fiber"
        );
        {
            let mut caller = self.caller.borrow_mut();
            assert!(caller.is_none(), "fiber already has a resume outstanding");
            *caller = Some(current.inner.clone());
        }

        trace!(
            "{} resuming {}",
            current.inner.annotation.borrow(),
            self.annotation.borrow()
        );

        // No RefCell borrow may be held across the switch: the fiber side
        // is free to take its own borrows while we are suspended.
        unsafe { Context::swap(current.inner.context.get(), self.context.get()) };

        *self.caller.borrow_mut() = None;

        if let Some(fault) = self.fault.take() {
            return Resumed::Faulted(fault);
        }
        if self.status.get() == Status::Finished {
            Resumed::Finished
        } else {
            Resumed::Suspended
        }
    }
}

impl Drop for FiberInner {
    fn drop(&mut self) {
        let payload = self.payload.replace(ptr::null_mut());
        if !payload.is_null() {
            if let Some(drop_payload) = self.drop_payload {
                // The fiber never ran; its callable is still emplaced on the
                // stack and must be destroyed before the stack is released.
                unsafe { drop_payload(payload) };
            }
        }
    }
}

/// A handle to an execution context: the main context of a thread, or a
/// fiber, typically the one currently running.
///
/// There is no ambient "current fiber" state in this crate. The root
/// context of a thread is created explicitly with [`Exec::main`], once per
/// thread by convention, and every fiber's callable receives the handle
/// for itself. Operations that switch away from the calling context, such
/// as [`Fiber::resume`] and [`Condition::wait`](crate::Condition::wait),
/// take the handle of whatever is actually executing the call.
#[derive(Clone)]
pub struct Exec {
    pub(crate) inner: Rc<FiberInner>,
}

impl Exec {
    /// Creates the root sentinel for the calling thread's ambient execution
    /// context. Create one per thread and thread it through explicitly.
    pub fn main() -> Exec {
        Exec::sentinel("main")
    }

    // Destructors have no calling fiber to switch from; they drive stops
    // through a fresh sentinel instead.
    pub(crate) fn sentinel(annotation: &str) -> Exec {
        Exec {
            inner: FiberInner::sentinel(annotation),
        }
    }

    pub(crate) fn from_inner(inner: Rc<FiberInner>) -> Exec {
        Exec { inner }
    }

    pub fn status(&self) -> Status {
        self.inner.status()
    }

    pub fn annotation(&self) -> String {
        self.inner.annotation()
    }

    pub fn annotate(&self, annotation: &str) {
        *self.inner.annotation.borrow_mut() = annotation.to_string();
    }

    pub fn is_main(&self) -> bool {
        self.inner.status() == Status::Main
    }

    /// Switches control back to the recorded caller without finishing.
    ///
    /// Must be called from the execution context this handle refers to,
    /// while a resume is outstanding (the main context has no caller to
    /// yield to). If a stop was requested while the fiber was parked, this
    /// raises the stop unwind instead of returning.
    pub fn yield_now(&self) {
        let caller = self
            .inner
            .caller
            .borrow()
            .clone()
            .expect("cannot yield from an execution context with no caller");

        trace!(
            "{} yielding to {}",
            self.inner.annotation.borrow(),
            caller.annotation.borrow()
        );

        unsafe { Context::swap(self.inner.context.get(), caller.context.get()) };

        if self.inner.status() == Status::Stopped {
            // Unwind down to the trampoline, which swallows this as a clean
            // termination.
            panic::resume_unwind(Box::new(StopSignal));
        }
    }
}

impl fmt::Debug for Exec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exec")
            .field("status", &self.status())
            .field("annotation", &self.annotation())
            .finish()
    }
}

/// A cooperatively scheduled, stackful unit of execution.
///
/// A fiber owns its [`Stack`] and [`Context`] and can suspend and resume at
/// arbitrary call depth. At most one fiber runs per thread at a time;
/// every switch is explicit.
///
/// `Fiber` is the unique owner: dropping it while the fiber is still
/// running forces a stop first, so the fiber's stack unwinds and its
/// resources are released deterministically.
pub struct Fiber {
    inner: Rc<FiberInner>,
}

impl Fiber {
    /// The stack size used by [`Fiber::new`].
    pub const DEFAULT_STACK_SIZE: usize = 128 * 1024;

    /// Creates a fiber with a default-sized stack. The callable receives
    /// the handle for the fiber's own execution context.
    ///
    /// The callable does not start running until the first
    /// [`resume`](Fiber::resume).
    pub fn new<F>(f: F) -> Result<Fiber, StackError>
    where
        F: FnOnce(&Exec) + 'static,
    {
        Ok(Fiber::with_stack(Stack::new(Self::DEFAULT_STACK_SIZE)?, f))
    }

    /// Like [`new`](Fiber::new), with the diagnostic annotation set up
    /// front so the fiber's very first trace lines already carry its name.
    pub fn with_annotation<F>(annotation: &str, f: F) -> Result<Fiber, StackError>
    where
        F: FnOnce(&Exec) + 'static,
    {
        let fiber = Fiber::new(f)?;
        fiber.annotate(annotation);
        Ok(fiber)
    }

    /// Creates a fiber on a caller-provided stack.
    ///
    /// The trampoline payload is emplaced on `stack` itself, so fiber
    /// construction performs no allocation beyond the stack reservation.
    pub fn with_stack<F>(mut stack: Stack, f: F) -> Fiber
    where
        F: FnOnce(&Exec) + 'static,
    {
        let inner = Rc::new_cyclic(|weak: &Weak<FiberInner>| {
            let payload = unsafe { Coentry::emplace(&mut stack, f, weak.clone()) };
            let context = unsafe { Context::new(stack, Coentry::<F>::cocall, payload as usize) };
            FiberInner {
                status: Cell::new(Status::Ready),
                annotation: RefCell::new(String::new()),
                context: UnsafeCell::new(context),
                caller: RefCell::new(None),
                fault: Cell::new(None),
                completion: Condition::new(),
                payload: Cell::new(payload as *mut ()),
                drop_payload: Some(Coentry::<F>::drop_erased),
            }
        });
        Fiber { inner }
    }

    pub fn status(&self) -> Status {
        self.inner.status()
    }

    /// Sets the diagnostic annotation carried in trace logs.
    pub fn annotate(&self, annotation: &str) {
        *self.inner.annotation.borrow_mut() = annotation.to_string();
    }

    pub fn annotation(&self) -> String {
        self.inner.annotation()
    }

    /// A non-owning handle to this fiber's execution context.
    pub fn exec(&self) -> Exec {
        Exec {
            inner: self.inner.clone(),
        }
    }

    /// Switches from `current` into the fiber, running it until it yields
    /// or finishes.
    ///
    /// Records `current` as the fiber's caller for the duration of the
    /// switch. A fault captured during this run comes back as
    /// [`Resumed::Faulted`].
    ///
    /// # Panics
    ///
    /// If the fiber attempts to resume itself, already has a resume
    /// outstanding, or is finished. All are caller contract violations.
    pub fn resume(&self, current: &Exec) -> Resumed {
        assert!(
            !Rc::ptr_eq(&self.inner, &current.inner),
            "a fiber cannot resume itself"
        );
        self.inner.resume(current)
    }

    /// Symmetric switch straight into this fiber, with no caller
    /// bookkeeping: fiber-to-fiber handoff where no "return to caller"
    /// relationship is being established. A transfer to self is a no-op.
    pub fn transfer(&self, current: &Exec) {
        if Rc::ptr_eq(&self.inner, &current.inner) {
            return;
        }
        trace!(
            "transfer from {} to {}",
            current.inner.annotation.borrow(),
            self.inner.annotation.borrow()
        );
        unsafe { Context::swap(current.inner.context.get(), self.inner.context.get()) };
    }

    /// Marks the fiber stopped and resumes it at once, so the stop unwind
    /// runs at its current suspension point and drives it to finished.
    ///
    /// # Panics
    ///
    /// If the fiber attempts to stop itself.
    pub fn stop(&self, current: &Exec) {
        assert!(
            !Rc::ptr_eq(&self.inner, &current.inner),
            "a fiber cannot stop itself"
        );
        self.inner.set_status(Status::Stopped);
        if let Resumed::Faulted(_) = self.inner.resume(current) {
            warn!(
                "discarding fault raised while stopping fiber {}",
                self.annotation()
            );
        }
    }

    /// Requests a stop without resuming: honored the next time the fiber is
    /// naturally resumed. A fiber canceled before it ever ran finishes
    /// without running its callable.
    pub fn cancel(&self) {
        match self.inner.status() {
            Status::Ready | Status::Running => self.inner.set_status(Status::Stopped),
            _ => {}
        }
    }

    /// Parks `current` until this fiber reaches [`Status::Finished`].
    /// Returns immediately if it already has.
    ///
    /// # Panics
    ///
    /// If a fiber attempts to wait on itself.
    pub fn wait(&self, current: &Exec) {
        assert!(
            !Rc::ptr_eq(&self.inner, &current.inner),
            "a fiber cannot wait on itself"
        );
        if self.inner.status() == Status::Finished {
            return;
        }
        self.inner.completion.wait(current);
    }
}

impl Drop for Fiber {
    fn drop(&mut self) {
        match self.inner.status() {
            // Never ran: the emplaced callable is destroyed with the inner
            // state. Finished: nothing left to do.
            Status::Ready | Status::Finished => {}
            Status::Running | Status::Stopped => {
                let root = Exec::sentinel("teardown");
                self.stop(&root);
            }
            // A fiber cannot be destroyed while its resume is outstanding:
            // the resumer borrows it for the whole call. `Finishing` and
            // `Main` are only observable during such a call.
            Status::Finishing | Status::Main => {
                unreachable!("fiber destroyed while its resume is outstanding")
            }
        }
    }
}

impl fmt::Debug for Fiber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber")
            .field("status", &self.status())
            .field("annotation", &self.annotation())
            .finish()
    }
}
