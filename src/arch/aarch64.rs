// This file is part of strand, a stackful fiber runtime.
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

// To understand the code in this file, keep in mind these facts:
// * The AAPCS64 callee-saved set is x19-x28, the frame pointer x29, the
//   link register x30, and the low 64 bits of v8-v15 (d8-d15): twenty
//   8-byte slots, a 160-byte register area.
// * sp must stay 16-byte aligned at all times, not just at call sites.
// * `ret` branches to x30, so a fresh context is entered by planting the
//   trampoline address in the saved-x30 slot.

use core::arch::naked_asm;
use core::ptr;

use super::StackPointer;

// Register area layout, offsets from the saved stack pointer.
const ENTRY_SLOT: usize = 0; // x19
const ARG_SLOT: usize = 1; // x20
const LR_SLOT: usize = 11; // x30
const FRAME_WORDS: usize = 20;

/// Switches to `to`, saving the suspended state of the running context
/// through `from`. Returns when some later `swap` targets `from` again.
///
/// # Safety
///
/// `to` must hold a stack pointer produced by [`init`] or by a previous
/// `swap` away from a live context, and both pointers must be valid.
#[unsafe(naked)]
pub unsafe extern "C" fn swap(from: *mut StackPointer, to: *const StackPointer) {
    naked_asm!(
        "sub sp, sp, #160",
        "stp x19, x20, [sp, #0]",
        "stp x21, x22, [sp, #16]",
        "stp x23, x24, [sp, #32]",
        "stp x25, x26, [sp, #48]",
        "stp x27, x28, [sp, #64]",
        "stp x29, x30, [sp, #80]",
        "stp d8, d9, [sp, #96]",
        "stp d10, d11, [sp, #112]",
        "stp d12, d13, [sp, #128]",
        "stp d14, d15, [sp, #144]",
        "mov x2, sp",
        "str x2, [x0]",
        "ldr x2, [x1]",
        "mov sp, x2",
        "ldp x19, x20, [sp, #0]",
        "ldp x21, x22, [sp, #16]",
        "ldp x23, x24, [sp, #32]",
        "ldp x25, x26, [sp, #48]",
        "ldp x27, x28, [sp, #64]",
        "ldp x29, x30, [sp, #80]",
        "ldp d8, d9, [sp, #96]",
        "ldp d10, d11, [sp, #112]",
        "ldp d12, d13, [sp, #128]",
        "ldp d14, d15, [sp, #144]",
        "add sp, sp, #160",
        // For a fresh context x30 holds `trampoline`; for a suspended one it
        // is the return address of its own `swap` call.
        "ret",
    )
}

// The first `swap` into a fresh stack "returns" here with the entry function
// in x19 and its argument in x20, restored from the frame `init` built.
#[unsafe(naked)]
unsafe extern "C" fn trampoline() -> ! {
    naked_asm!(
        "mov x0, x20",
        // Zero the frame pointer and link register so unwinders and
        // backtraces stop here instead of walking off the stack top.
        "mov x29, xzr",
        "mov x30, xzr",
        "br x19",
    )
}

/// Builds the initial frame for `entry(arg)` below `sp` and returns the
/// stack pointer the first `swap` should load.
///
/// # Safety
///
/// `sp` must point at least 160 writable bytes above the guard region of a
/// fresh stack and be 16-byte aligned. `entry` must never return.
pub unsafe fn init(
    sp: *mut u8,
    entry: unsafe extern "C" fn(usize) -> !,
    arg: usize,
) -> StackPointer {
    debug_assert_eq!(sp as usize % 16, 0);

    let frame = sp.sub(FRAME_WORDS * 8) as *mut usize;
    ptr::write_bytes(frame, 0, FRAME_WORDS);
    frame.add(ENTRY_SLOT).write(entry as usize);
    frame.add(ARG_SLOT).write(arg);
    let ret: unsafe extern "C" fn() -> ! = trampoline;
    frame.add(LR_SLOT).write(ret as usize);
    StackPointer(frame as *mut u8)
}
