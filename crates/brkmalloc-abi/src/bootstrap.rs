//! Bootstrap arena for reentrant allocations.
//!
//! A thread that is already inside the allocator (for example while
//! `parking_lot` sets up its parking table during a contended lock) must not
//! re-enter the heap. Such requests are served from a fixed static arena by a
//! lock-free bump pointer. Bootstrap memory is never reused: releasing it is a
//! no-op.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

use brkmalloc_core::ALIGN;
use brkmalloc_core::malloc::header::WORD;

pub const BOOTSTRAP_BYTES: usize = 256 * 1024;

#[repr(C, align(16))]
struct Arena(UnsafeCell<[u8; BOOTSTRAP_BYTES]>);

// SAFETY: chunks are handed out disjointly through the atomic cursor.
unsafe impl Sync for Arena {}

static ARENA: Arena = Arena(UnsafeCell::new([0; BOOTSTRAP_BYTES]));
static CURSOR: AtomicUsize = AtomicUsize::new(0);

fn base() -> usize {
    ARENA.0.get() as usize
}

/// Carves `size` bytes aligned to `align` (a power of two). Each chunk is
/// preceded by a word holding its size. Returns 0 when the arena is full.
pub fn allocate(size: usize, align: usize) -> usize {
    let align = align.max(ALIGN);
    let base = base();
    let mut current = CURSOR.load(Ordering::Relaxed);
    loop {
        let Some(payload) = (base + current)
            .checked_add(WORD + align - 1)
            .map(|v| v & !(align - 1))
        else {
            return 0;
        };
        let end = match (payload - base).checked_add(size.max(1)) {
            Some(end) if end <= BOOTSTRAP_BYTES => end,
            _ => return 0,
        };
        match CURSOR.compare_exchange_weak(current, end, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => {
                // SAFETY: [payload - WORD, payload + size) was just reserved
                // for this caller and lies inside ARENA.
                unsafe { ((payload - WORD) as *mut usize).write(size) };
                return payload;
            }
            Err(seen) => current = seen,
        }
    }
}

#[must_use]
pub fn contains(addr: usize) -> bool {
    let base = base();
    addr >= base && addr < base + BOOTSTRAP_BYTES
}

/// Size recorded for the bootstrap chunk at `addr`.
///
/// # Safety
///
/// `addr` must have been returned by [`allocate`].
#[must_use]
pub unsafe fn size_of(addr: usize) -> usize {
    // SAFETY: every chunk is preceded by its size word.
    unsafe { ((addr - WORD) as *const usize).read() }
}
