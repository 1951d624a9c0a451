// This file is part of strand, a stackful fiber runtime.
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

// To understand the code in this file, keep in mind these facts:
// * The x86_64 SysV C ABI requires the stack to be aligned at function
//   entry, so that (%rsp+8) is a multiple of 16. Aligned operands are a
//   requirement of SIMD instructions, so getting this wrong crashes in
//   whatever the entry function calls first.
// * Only %rbp, %rbx and %r12-%r15 are callee-saved; everything else is dead
//   across a call, so a switch that looks like a call only needs to spill
//   those six.

use core::arch::naked_asm;

use super::StackPointer;

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
        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "mov [rdi], rsp",
        "mov rsp, [rsi]",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        // For a fresh context this lands in `trampoline`; for a suspended
        // one it returns from its own `swap` call.
        "ret",
    )
}

// The first `swap` into a fresh stack returns here with the entry function
// and its argument sitting in the two words `init` left above the register
// area.
#[unsafe(naked)]
unsafe extern "C" fn trampoline() -> ! {
    naked_asm!(
        "pop rax", // entry
        "pop rdi", // arg
        // Zero the frame pointer and fake a return address so unwinders and
        // backtraces stop here instead of walking off the stack top.
        "xor ebp, ebp",
        "push rbp",
        "jmp rax",
    )
}

/// Builds the initial frame for `entry(arg)` below `sp` and returns the
/// stack pointer the first `swap` should load.
///
/// # Safety
///
/// `sp` must point at least `9 * 8` writable bytes above the guard region of
/// a fresh stack and be 16-byte aligned. `entry` must never return.
pub unsafe fn init(
    sp: *mut u8,
    entry: unsafe extern "C" fn(usize) -> !,
    arg: usize,
) -> StackPointer {
    debug_assert_eq!(sp as usize % 16, 0);

    unsafe fn push(sp: &mut *mut usize, value: usize) {
        *sp = sp.sub(1);
        sp.write(value);
    }

    let mut sp = sp as *mut usize;
    push(&mut sp, arg);
    push(&mut sp, entry as usize);
    let ret: unsafe extern "C" fn() -> ! = trampoline;
    push(&mut sp, ret as usize);
    // The six callee-saved register slots `swap` will pop.
    for _ in 0..6 {
        push(&mut sp, 0);
    }
    StackPointer(sp as *mut u8)
}
