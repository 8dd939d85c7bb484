//! Raw x86_64 Linux syscall primitives.
//!
//! Each function issues a single `syscall` instruction. The return value is
//! the raw kernel return in `rax`.
//!
//! ```text
//! syscall number → rax
//! arg1           → rdi
//! arg2           → rsi
//! arg3           → rdx
//! return         → rax
//! clobbered      → rcx, r11
//! ```

use core::arch::asm;

/// Issue a syscall with 1 argument.
///
/// # Safety
///
/// The caller must supply valid syscall number and argument.
#[inline]
pub unsafe fn syscall1(nr: usize, a1: usize) -> usize {
    let ret: usize;
    // SAFETY: Inline asm issues syscall instruction. Caller guarantees validity.
    unsafe {
        asm!(
            "syscall",
            inlateout("rax") nr => ret,
            in("rdi") a1,
            lateout("rcx") _,
            lateout("r11") _,
            options(nostack, preserves_flags),
        );
    }
    ret
}

/// Issue a syscall with 3 arguments.
///
/// # Safety
///
/// The caller must supply valid syscall number and arguments.
#[inline]
pub unsafe fn syscall3(nr: usize, a1: usize, a2: usize, a3: usize) -> usize {
    let ret: usize;
    // SAFETY: Inline asm issues syscall instruction. Caller guarantees validity.
    unsafe {
        asm!(
            "syscall",
            inlateout("rax") nr => ret,
            in("rdi") a1,
            in("rsi") a2,
            in("rdx") a3,
            lateout("rcx") _,
            lateout("r11") _,
            options(nostack, preserves_flags),
        );
    }
    ret
}
