//! Data-segment heap source.
//!
//! Grows the heap by moving the program break. The first growth aligns the
//! break up to `ALIGN`; every later growth must start exactly where the
//! previous one ended; if anything else moved the break in between, growth
//! fails with `Discontiguous` and the heap never spans the gap.

use std::ptr;

use brkmalloc_core::malloc::header::WORD;
use brkmalloc_core::{ALIGN, HeapError, HeapSource};

/// Heap source backed by `brk(2)`.
#[derive(Debug)]
pub struct BrkHeapSource {
    /// Address of heap offset 0. Zero until the first growth.
    base: usize,
    len: usize,
}

impl BrkHeapSource {
    #[must_use]
    pub const fn new() -> Self {
        Self { base: 0, len: 0 }
    }

    #[inline]
    fn at(&self, offset: usize) -> *mut u8 {
        debug_assert!(offset <= self.len);
        (self.base + offset) as *mut u8
    }
}

impl Default for BrkHeapSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(target_arch = "x86_64", target_os = "linux"))]
fn current_break() -> usize {
    brkmalloc_core::syscall::sys_brk(0)
}

#[cfg(all(target_arch = "x86_64", target_os = "linux"))]
fn move_break(target: usize) -> bool {
    brkmalloc_core::syscall::sys_brk(target) >= target
}

#[cfg(not(all(target_arch = "x86_64", target_os = "linux")))]
fn current_break() -> usize {
    // SAFETY: sbrk(0) only queries the break.
    unsafe { libc::sbrk(0) as usize }
}

#[cfg(not(all(target_arch = "x86_64", target_os = "linux")))]
fn move_break(target: usize) -> bool {
    let current = current_break();
    let Some(delta) = target.checked_sub(current).and_then(|d| isize::try_from(d).ok()) else {
        return false;
    };
    // SAFETY: extends the data segment; the new range belongs to this heap.
    let old = unsafe { libc::sbrk(delta as _) };
    old as usize != usize::MAX
}

impl HeapSource for BrkHeapSource {
    fn base_addr(&self) -> usize {
        self.base
    }

    fn extent(&self) -> usize {
        self.len
    }

    fn grow(&mut self, bytes: usize) -> Result<usize, HeapError> {
        let current = current_break();
        let start = if self.len == 0 {
            current
                .checked_add(ALIGN - 1)
                .map(|v| v & !(ALIGN - 1))
                .ok_or(HeapError::Exhausted { requested: bytes })?
        } else {
            let expected = self.base + self.len;
            if current != expected {
                return Err(HeapError::Discontiguous {
                    expected,
                    found: current,
                });
            }
            expected
        };
        let target = start
            .checked_add(bytes)
            .ok_or(HeapError::Exhausted { requested: bytes })?;
        if !move_break(target) {
            return Err(HeapError::Exhausted { requested: bytes });
        }
        if self.len == 0 {
            self.base = start;
        }
        let offset = self.len;
        self.len += bytes;
        Ok(offset)
    }

    fn read_word(&self, offset: usize) -> usize {
        debug_assert!(offset + WORD <= self.len);
        // SAFETY: offset is word aligned and inside [base, base + len), which
        // this source obtained from brk and never gives back.
        unsafe { ptr::read(self.at(offset).cast::<usize>()) }
    }

    fn write_word(&mut self, offset: usize, value: usize) {
        debug_assert!(offset + WORD <= self.len);
        // SAFETY: as in read_word; the heap lock gives exclusive access.
        unsafe { ptr::write(self.at(offset).cast::<usize>(), value) }
    }

    fn copy_within(&mut self, src: usize, dst: usize, len: usize) {
        debug_assert!(src + len <= self.len && dst + len <= self.len);
        // SAFETY: both ranges lie inside the heap; ptr::copy allows overlap.
        unsafe { ptr::copy(self.at(src), self.at(dst), len) }
    }

    fn fill(&mut self, offset: usize, len: usize, byte: u8) {
        debug_assert!(offset + len <= self.len);
        // SAFETY: the range lies inside the heap.
        unsafe { ptr::write_bytes(self.at(offset), byte, len) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_source() {
        let source = BrkHeapSource::new();
        assert_eq!(source.base_addr(), 0);
        assert_eq!(source.extent(), 0);
        assert_eq!(source.offset_of(0x1000), None);
    }

    #[test]
    fn test_break_query_is_nonzero() {
        assert_ne!(current_break(), 0);
    }

    #[test]
    fn test_discontiguous_break_is_reported() {
        let mut source = BrkHeapSource {
            base: 0x1000,
            len: 64,
        };
        let err = source.grow(64).unwrap_err();
        assert!(matches!(
            err,
            HeapError::Discontiguous {
                expected: 0x1040,
                ..
            }
        ));
        assert_eq!(source.extent(), 64);
    }
}
