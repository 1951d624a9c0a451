// This file is part of strand, a stackful fiber runtime.
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! strand is a library implementing stackful fibers: cooperatively scheduled
//! units of execution that each own an independently allocated call stack and
//! can suspend and resume at arbitrary call depth.
//!
//! It provides the following abstractions:
//!
//!   * a guarded stack allocator based on anonymous memory mappings,
//!     [`Stack`];
//!   * a resumable execution point binding a stack to an entry trampoline,
//!     [`Context`];
//!   * the fiber itself, [`Fiber`], with explicit resume/yield/transfer/stop
//!     operations, and [`Exec`], the handle to the execution context that is
//!     currently running;
//!   * a fiber-level parking/wakeup primitive, [`Condition`];
//!   * a container that keeps fibers alive for the caller, [`Pool`];
//!   * a bounded-queue worker-thread pool, [`Distributor`].
//!
//! Exactly one fiber runs per thread at a time; switching is always explicit
//! and cooperative. There is no ambient "current fiber" state: every
//! operation that needs the calling execution context takes an [`Exec`]
//! handle. The root context of a thread is created with [`Exec::main`], once
//! per thread, and threaded through explicitly from there. Passing an `Exec`
//! that is not the context actually executing the call is a logic error;
//! self-resume, double resume and resuming a finished fiber are checked with
//! assertions.
//!
//! Fiber handles hold `Rc`s and are deliberately not `Send`: the cooperative
//! primitives must never be shared across the [`Distributor`]'s worker
//! threads, which use ordinary OS synchronization instead.

#[cfg(not(unix))]
compile_error!("strand requires a Unix-like target for its stack mappings");

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("strand supports x86_64 and aarch64 only");

pub use crate::condition::Condition;
pub use crate::context::Context;
pub use crate::distributor::{Distributor, DistributorError};
pub use crate::fiber::{Exec, Fault, Fiber, Resumed, Status};
pub use crate::pool::Pool;
pub use crate::stack::{Stack, StackError};

mod arch;
mod coentry;
mod condition;
mod context;
mod distributor;
mod fiber;
mod pool;
mod stack;
