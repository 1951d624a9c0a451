// This file is part of strand, a stackful fiber runtime.
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Guarded stack allocation.

use std::io;
use std::mem;
use std::ptr;
use std::sync::OnceLock;

use libc::{c_int, c_void};
use log::debug;
use thiserror::Error;

/// An error raised while setting up a [`Stack`]. Whatever was reserved
/// before the failure has been released by the time the error is returned.
#[derive(Debug, Error)]
pub enum StackError {
    /// The anonymous mapping backing the stack could not be made.
    #[error("failed to allocate a {size} byte stack: {source}")]
    Allocation { size: usize, source: io::Error },
    /// The mapping succeeded but the guard page could not be protected.
    #[error("failed to protect the stack guard page: {source}")]
    Protection { source: io::Error },
}

const GUARD_PROT: c_int = libc::PROT_NONE;
const STACK_PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;
#[cfg(not(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "dragonfly"
)))]
const STACK_FLAGS: c_int = libc::MAP_STACK | libc::MAP_PRIVATE | libc::MAP_ANON;
// MAP_STACK either does not exist or misbehaves on these targets.
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "dragonfly"
))]
const STACK_FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANON;

/// A fiber's call stack: one anonymous memory mapping with a protected guard
/// page at its low end, so overflowing the stack faults immediately instead
/// of corrupting whatever is mapped next to it.
///
/// The layout is `base < bottom <= current <= top`. The stack grows
/// downward from `top`; `[base, bottom)` is the guard region; `current` is
/// the write cursor [`emplace`](Stack::emplace) carves values from.
///
/// A `Stack` is exclusively owned by one fiber for its entire lifetime.
/// It can be moved but not cloned: the backing reservation is a unique
/// operating-system resource.
#[derive(Debug)]
pub struct Stack {
    base: *mut u8,
    bottom: *mut u8,
    current: *mut u8,
    top: *mut u8,
}

unsafe impl Send for Stack {}

impl Stack {
    /// Every carve from the stack keeps the cursor at least this aligned.
    pub const ALIGNMENT: usize = 16;

    /// Stacks have to be at least 16 KiB to support unwinding.
    pub const MIN_SIZE: usize = 16 * 1024;

    /// Allocates a stack with at least `size` accessible bytes.
    ///
    /// `size` is clamped to [`MIN_SIZE`](Stack::MIN_SIZE), rounded up to an
    /// integral number of pages, and extended by one guard page.
    pub fn new(size: usize) -> Result<Stack, StackError> {
        let page_size = page_size();
        let size = size.max(Self::MIN_SIZE);

        // Round the length one page up, using the fact that the page size
        // is a power of two, then add the guard page.
        let len = size
            .checked_add(page_size - 1)
            .map(|n| n & !(page_size - 1))
            .and_then(|n| n.checked_add(page_size));
        let Some(len) = len else {
            return Err(StackError::Allocation {
                size,
                source: io::Error::from_raw_os_error(libc::ENOMEM),
            });
        };

        let base = unsafe { libc::mmap(ptr::null_mut(), len, STACK_PROT, STACK_FLAGS, -1, 0) };
        if base == libc::MAP_FAILED {
            return Err(StackError::Allocation {
                size,
                source: io::Error::last_os_error(),
            });
        }

        let base = base as *mut u8;
        let stack = Stack {
            base,
            bottom: unsafe { base.add(page_size) },
            current: unsafe { base.add(len) },
            top: unsafe { base.add(len) },
        };

        // Mark the guard page. If this fails, `stack` is dropped on the way
        // out, unmapping the partial reservation.
        if unsafe { libc::mprotect(base as *mut c_void, page_size, GUARD_PROT) } != 0 {
            return Err(StackError::Protection {
                source: io::Error::last_os_error(),
            });
        }

        debug!("allocated {} byte stack at {:p}", len, base);
        Ok(stack)
    }

    /// The empty stack backing a main-context sentinel. Holds no
    /// reservation; dropping it is a no-op.
    pub(crate) fn empty() -> Stack {
        Stack {
            base: ptr::null_mut(),
            bottom: ptr::null_mut(),
            current: ptr::null_mut(),
            top: ptr::null_mut(),
        }
    }

    /// Constructs `value` in an aligned slot carved below the current
    /// cursor and returns a pointer to it.
    ///
    /// # Safety
    ///
    /// The caller is responsible for destroying the value (the stack never
    /// will) and for not letting the pointer outlive the stack. There is no
    /// bound check against `bottom`: the guard page is the safety net, as
    /// it is for ordinary stack growth.
    pub unsafe fn emplace<T>(&mut self, value: T) -> *mut T {
        let alignment = Self::ALIGNMENT.max(mem::align_of::<T>());
        let addr = (self.current as usize - mem::size_of::<T>()) & !(alignment - 1);
        self.current = addr as *mut u8;
        let slot = addr as *mut T;
        slot.write(value);
        slot
    }

    /// The lowest address of the reservation, where the guard region starts.
    pub fn base(&self) -> *mut u8 {
        self.base
    }

    /// The lowest usable address; the guard region ends just below it.
    pub fn bottom(&self) -> *mut u8 {
        self.bottom
    }

    /// The current write cursor, `top` minus any emplacements.
    pub fn current(&self) -> *mut u8 {
        self.current
    }

    /// The highest address; the stack grows downward from here.
    pub fn top(&self) -> *mut u8 {
        self.top
    }

    /// The usable stack space remaining below the cursor.
    pub fn size(&self) -> usize {
        self.current as usize - self.bottom as usize
    }

    /// The full size of the reservation, guard page included.
    pub fn allocated_size(&self) -> usize {
        self.top as usize - self.base as usize
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        if self.base.is_null() {
            return;
        }
        let len = self.allocated_size();
        // A failed unmap leaves the address space in an unknown state;
        // nothing sensible can continue from that.
        if unsafe { libc::munmap(self.base as *mut c_void, len) } != 0 {
            panic!(
                "munmap for stack {:p} of size {} failed: {}",
                self.base,
                len,
                io::Error::last_os_error()
            );
        }
    }
}

fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(|| unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize })
}
