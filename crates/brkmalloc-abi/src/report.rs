//! Allocation-free output for the exit report and heap diagnostics.

use core::fmt::{self, Write};

use brkmalloc_core::{HeapStats, HeapViolation};

pub const STDOUT: i32 = 1;
pub const STDERR: i32 = 2;

/// Fixed-size `fmt::Write` sink on the stack. Output past `N` bytes is
/// dropped.
pub struct StackWriter<const N: usize> {
    buf: [u8; N],
    len: usize,
    truncated: bool,
}

impl<const N: usize> StackWriter<N> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buf: [0; N],
            len: 0,
            truncated: false,
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    #[must_use]
    pub fn truncated(&self) -> bool {
        self.truncated
    }
}

impl<const N: usize> Default for StackWriter<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Write for StackWriter<N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = N - self.len;
        let take = s.len().min(room);
        self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        if take < s.len() {
            self.truncated = true;
        }
        Ok(())
    }
}

#[cfg(all(target_arch = "x86_64", target_os = "linux"))]
fn write_raw(fd: i32, bytes: &[u8]) -> Result<usize, i32> {
    // SAFETY: bytes is a live slice for the duration of the call.
    unsafe { brkmalloc_core::syscall::sys_write(fd, bytes.as_ptr(), bytes.len()) }
}

#[cfg(not(all(target_arch = "x86_64", target_os = "linux")))]
fn write_raw(fd: i32, bytes: &[u8]) -> Result<usize, i32> {
    // SAFETY: bytes is a live slice for the duration of the call.
    let n = unsafe { libc::write(fd, bytes.as_ptr().cast(), bytes.len()) };
    if n < 0 { Err(-1) } else { Ok(n as usize) }
}

/// Writes all of `bytes` to `fd`, giving up on the first error.
pub fn write_fd(fd: i32, mut bytes: &[u8]) {
    while !bytes.is_empty() {
        match write_raw(fd, bytes) {
            Ok(0) | Err(_) => return,
            Ok(n) => bytes = &bytes[n..],
        }
    }
}

/// Writes the statistics report to `fd`.
pub fn write_stats(fd: i32, stats: &HeapStats) {
    let mut out = StackWriter::<512>::new();
    let _ = write!(out, "{stats}");
    write_fd(fd, out.as_bytes());
}

/// Writes a validator diagnostic to `fd`.
pub fn write_violation(fd: i32, violation: &HeapViolation) {
    let mut out = StackWriter::<256>::new();
    let _ = writeln!(out, "brkmalloc: {violation}");
    write_fd(fd, out.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use brkmalloc_core::ViolationKind;

    #[test]
    fn test_stack_writer_truncates() {
        let mut out = StackWriter::<8>::new();
        write!(out, "0123456789").unwrap();
        assert_eq!(out.as_bytes(), b"01234567");
        assert!(out.truncated());
    }

    #[test]
    fn test_report_fits_stack_buffer() {
        let stats = HeapStats {
            heap_size: usize::MAX,
            allocate_calls: u64::MAX,
            release_calls: u64::MAX,
            resize_calls: u64::MAX,
            zero_allocate_calls: u64::MAX,
            ..HeapStats::default()
        };
        let mut out = StackWriter::<512>::new();
        write!(out, "{stats}").unwrap();
        assert!(!out.truncated());
        let text = std::str::from_utf8(out.as_bytes()).unwrap();
        assert!(text.contains("# frees:"));
    }

    #[test]
    fn test_violation_line() {
        let violation = HeapViolation {
            offset: 0x40,
            addr: 0x1_0040,
            kind: ViolationKind::AdjacentFree,
        };
        let mut out = StackWriter::<256>::new();
        writeln!(out, "brkmalloc: {violation}").unwrap();
        let text = std::str::from_utf8(out.as_bytes()).unwrap();
        assert!(text.starts_with("brkmalloc: heap violation at block 0x10040"));
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn test_write_fd_to_stdout() {
        write_fd(STDOUT, b"");
        write_fd(STDOUT, b"report smoke\n");
    }
}
