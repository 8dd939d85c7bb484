//! ABI layer for the C allocation functions.
//!
//! Each symbol is a thin veneer over [`heap_state`](crate::heap_state):
//! convert pointers to heap addresses, call the heap, map failure to a null
//! return plus `errno`.

use std::ffi::{c_int, c_void};

use crate::heap_state;

#[cfg(target_os = "linux")]
fn errno_slot() -> *mut c_int {
    // SAFETY: returns this thread's errno slot.
    unsafe { libc::__errno_location() }
}

#[cfg(target_os = "macos")]
fn errno_slot() -> *mut c_int {
    // SAFETY: returns this thread's errno slot.
    unsafe { libc::__error() }
}

#[inline]
fn set_errno(code: c_int) {
    // SAFETY: the errno slot is valid for the current thread.
    unsafe { *errno_slot() = code };
}

#[inline]
fn to_ptr(addr: usize) -> *mut c_void {
    addr as *mut c_void
}

#[inline]
fn oom_if_null(addr: usize, requested: bool) -> *mut c_void {
    if addr == 0 && requested {
        set_errno(libc::ENOMEM);
    }
    to_ptr(addr)
}

fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    usize::try_from(size).unwrap_or(4096)
}

// ---------------------------------------------------------------------------
// malloc / free
// ---------------------------------------------------------------------------

/// C `malloc`. Returns null for `size == 0` and on exhaustion (`ENOMEM`).
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn malloc(size: usize) -> *mut c_void {
    oom_if_null(heap_state::allocate(size), size != 0)
}

/// C `free`. Null and pointers the heap does not own are ignored.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn free(ptr: *mut c_void) {
    heap_state::release(ptr as usize);
}

// ---------------------------------------------------------------------------
// realloc / calloc
// ---------------------------------------------------------------------------

/// C `realloc`.
///
/// `realloc(NULL, n)` is `malloc(n)`; `realloc(p, 0)` frees `p` and returns
/// null. On failure the original block is left untouched.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    oom_if_null(heap_state::resize(ptr as usize, size), size != 0)
}

/// C `calloc`. Overflow of `nmemb * size` fails with `ENOMEM`.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn calloc(nmemb: usize, size: usize) -> *mut c_void {
    let requested = nmemb.checked_mul(size) != Some(0);
    oom_if_null(heap_state::zero_allocate(nmemb, size), requested)
}

/// GNU `malloc_usable_size`.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn malloc_usable_size(ptr: *mut c_void) -> usize {
    heap_state::usable_size(ptr as usize)
}

// ---------------------------------------------------------------------------
// aligned allocation
// ---------------------------------------------------------------------------

/// POSIX `posix_memalign`.
///
/// Returns `EINVAL` unless `alignment` is a power of two multiple of
/// `sizeof(void *)`, `ENOMEM` on exhaustion.
///
/// # Safety
///
/// `memptr` must be valid for a pointer-sized write.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn posix_memalign(
    memptr: *mut *mut c_void,
    alignment: usize,
    size: usize,
) -> c_int {
    if !alignment.is_power_of_two() || !alignment.is_multiple_of(size_of::<usize>()) {
        return libc::EINVAL;
    }
    if size == 0 {
        // SAFETY: caller guarantees `memptr` is writable.
        unsafe { *memptr = std::ptr::null_mut() };
        return 0;
    }
    match heap_state::allocate_aligned(alignment, size) {
        0 => libc::ENOMEM,
        addr => {
            // SAFETY: caller guarantees `memptr` is writable.
            unsafe { *memptr = to_ptr(addr) };
            0
        }
    }
}

/// C11 `aligned_alloc`.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn aligned_alloc(alignment: usize, size: usize) -> *mut c_void {
    if !alignment.is_power_of_two() {
        set_errno(libc::EINVAL);
        return std::ptr::null_mut();
    }
    oom_if_null(heap_state::allocate_aligned(alignment, size), size != 0)
}

/// Legacy `memalign`.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn memalign(alignment: usize, size: usize) -> *mut c_void {
    if !alignment.is_power_of_two() {
        set_errno(libc::EINVAL);
        return std::ptr::null_mut();
    }
    oom_if_null(heap_state::allocate_aligned(alignment, size), size != 0)
}

/// Legacy `valloc`: page-aligned allocation.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn valloc(size: usize) -> *mut c_void {
    oom_if_null(heap_state::allocate_aligned(page_size(), size), size != 0)
}

// ---------------------------------------------------------------------------
// diagnostics
// ---------------------------------------------------------------------------

/// Walks the heap and aborts with a diagnostic if any invariant is broken.
#[allow(non_snake_case)]
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub extern "C" fn checkHeap() {
    heap_state::check_heap();
}
