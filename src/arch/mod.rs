// This file is part of strand, a stackful fiber runtime.
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The machine context-switch primitive.
//!
//! Each architecture provides two operations:
//!
//!   * `swap(from, to)` spills the callee-saved register set onto the
//!     running stack, stores the stack pointer through `from`, loads the
//!     stack pointer from `to` and returns into the destination context;
//!   * `init(sp, entry, arg)` builds the frame a fresh stack needs so that
//!     the first `swap` into it enters `entry(arg)`.
//!
//! Unwinding never crosses `swap`: every panic raised inside a fiber is
//! caught by the trampoline before the switch back out.

use core::ptr;

pub use self::imp::{init, swap};

#[cfg_attr(target_arch = "x86_64", path = "x86_64.rs")]
#[cfg_attr(target_arch = "aarch64", path = "aarch64.rs")]
mod imp;

/// A saved stack pointer, the entire suspended state of an execution
/// context. The register set it refers to lives on the stack it points into.
#[derive(Debug, Clone, Copy)]
#[repr(transparent)]
pub struct StackPointer(pub(crate) *mut u8);

impl StackPointer {
    /// A context that has not been switched out of yet. `swap` writes the
    /// real value the first time control leaves the context.
    pub fn null() -> StackPointer {
        StackPointer(ptr::null_mut())
    }
}
