//! Raw Linux x86_64 syscall veneer.
//!
//! The allocator cannot go through `libc` for the data segment primitive
//! once it *is* the process allocator, so the two syscalls it needs are
//! issued directly:
//!
//! - `brk` to query and move the program break (the heap source).
//! - `write` to emit the exit report and violation diagnostics without
//!   touching stdio buffers, which would allocate.
//!
//! # Safety
//!
//! The raw `syscallN` functions are `unsafe` because the kernel trusts the
//! caller to supply valid arguments.

mod raw;

pub use raw::*;

pub const SYS_WRITE: usize = 1;
pub const SYS_BRK: usize = 12;

/// Maximum errno value returned by Linux syscalls.
const MAX_ERRNO: usize = 4095;

/// Convert a raw syscall return value to `Result<usize, i32>`.
///
/// Error returns are in the range `[-(MAX_ERRNO), -1]`, which in unsigned
/// representation is `[usize::MAX - MAX_ERRNO + 1, usize::MAX]`.
#[inline]
pub fn syscall_result(ret: usize) -> Result<usize, i32> {
    if ret > usize::MAX - MAX_ERRNO {
        Err(-(ret as isize) as i32)
    } else {
        Ok(ret)
    }
}

/// `brk(addr)`: move the program break to `addr`.
///
/// The raw syscall never fails with an errno. It returns the new break on
/// success and the unchanged current break on failure, so `sys_brk(0)`
/// queries the break.
#[inline]
pub fn sys_brk(addr: usize) -> usize {
    // SAFETY: brk takes a plain address and never dereferences it; the kernel
    // validates the requested range against the data segment limits.
    unsafe { raw::syscall1(SYS_BRK, addr) }
}

/// `write(fd, buf, count)`: write to a file descriptor.
///
/// # Safety
///
/// `buf` must point to a readable region of at least `count` bytes.
#[inline]
pub unsafe fn sys_write(fd: i32, buf: *const u8, count: usize) -> Result<usize, i32> {
    // SAFETY: caller guarantees buf validity and count bounds.
    let ret = unsafe { raw::syscall3(SYS_WRITE, fd as usize, buf as usize, count) };
    syscall_result(ret)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brk_query_returns_break() {
        let current = sys_brk(0);
        assert_ne!(current, 0, "program break should be a real address");
    }

    #[test]
    fn brk_refuses_impossible_target() {
        let target = usize::MAX & !0xFFF;
        let out = sys_brk(target);
        assert!(out < target, "kernel must leave the break below an unmappable target");
    }

    #[test]
    fn write_to_stdout() {
        let msg = b"";
        // SAFETY: msg is a valid byte slice.
        let result = unsafe { sys_write(1, msg.as_ptr(), msg.len()) };
        assert_eq!(result, Ok(0), "write of 0 bytes to stdout should succeed");
    }

    #[test]
    fn write_to_bad_fd_reports_errno() {
        let msg = b"x";
        // SAFETY: msg is a valid byte slice.
        let result = unsafe { sys_write(-1, msg.as_ptr(), msg.len()) };
        assert_eq!(result, Err(9), "EBADF expected");
    }

    #[test]
    fn syscall_result_splits_errno_range() {
        assert_eq!(syscall_result(0), Ok(0));
        assert_eq!(syscall_result(4096), Ok(4096));
        assert_eq!(syscall_result(usize::MAX), Err(1));
        assert_eq!(syscall_result(usize::MAX - 11), Err(12));
    }
}
