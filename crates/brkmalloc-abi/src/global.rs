//! Rust global allocator over the process heap.
//!
//! ```ignore
//! #[global_allocator]
//! static GLOBAL: brkmalloc_abi::BrkMalloc = brkmalloc_abi::BrkMalloc;
//! ```

use std::alloc::{GlobalAlloc, Layout};
use std::ptr;

use brkmalloc_core::ALIGN;

use crate::heap_state;

/// `GlobalAlloc` backed by the brk heap.
#[derive(Debug, Default, Clone, Copy)]
pub struct BrkMalloc;

unsafe impl GlobalAlloc for BrkMalloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let addr = if layout.align() <= ALIGN {
            heap_state::allocate(layout.size())
        } else {
            heap_state::allocate_aligned(layout.align(), layout.size())
        };
        addr as *mut u8
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        heap_state::release(ptr as usize);
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if layout.align() <= ALIGN {
            return heap_state::zero_allocate(1, layout.size()) as *mut u8;
        }
        // SAFETY: same contract as alloc.
        let ptr = unsafe { self.alloc(layout) };
        if !ptr.is_null() {
            // SAFETY: alloc returned at least layout.size() writable bytes.
            unsafe { ptr::write_bytes(ptr, 0, layout.size()) };
        }
        ptr
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() <= ALIGN {
            return heap_state::resize(ptr as usize, new_size) as *mut u8;
        }
        // SAFETY: layout is the caller's current layout; new_size is non-zero.
        let new_layout = unsafe { Layout::from_size_align_unchecked(new_size, layout.align()) };
        // SAFETY: same contract as alloc.
        let fresh = unsafe { self.alloc(new_layout) };
        if !fresh.is_null() {
            // SAFETY: both blocks are live and distinct.
            unsafe {
                ptr::copy_nonoverlapping(ptr, fresh, layout.size().min(new_size));
                self.dealloc(ptr, layout);
            }
        }
        fresh
    }
}
