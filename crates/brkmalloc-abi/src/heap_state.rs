//! The process-wide heap and its entry points.
//!
//! Every allocation call from C or from [`BrkMalloc`](crate::BrkMalloc)
//! goes through the functions here:
//! 1. a thread-local reentry guard; a thread already inside the allocator is
//!    served from the [`bootstrap`](crate::bootstrap) arena instead;
//! 2. one-time configuration from the environment;
//! 3. the locked heap.

use std::cell::Cell;
use std::ffi::{CStr, c_char};
use std::sync::atomic::{AtomicU8, Ordering};

use brkmalloc_core::config::{ENV_CHECK, ENV_GROWTH, ENV_LOG, ENV_VERBOSE};
use brkmalloc_core::{HeapConfig, HeapStats, HeapViolation, LockedHeap};

use crate::bootstrap;
use crate::brk_source::BrkHeapSource;
use crate::report;

/// Configuration the process heap starts with.
pub const PROCESS_DEFAULT: HeapConfig = HeapConfig::DEFAULT.with_violation_handler(abort_on_violation);

pub static HEAP: LockedHeap<BrkHeapSource> =
    LockedHeap::with_config(BrkHeapSource::new(), PROCESS_DEFAULT);

// Setup lifecycle. A thread that sees CONFIGURING (including a reentrant
// call made while reading the environment) proceeds with the defaults.
const SETUP_PENDING: u8 = 0;
const SETUP_CONFIGURING: u8 = 1;
const SETUP_READY: u8 = 2;

static SETUP_STATE: AtomicU8 = AtomicU8::new(SETUP_PENDING);

thread_local! {
    static ALLOCATOR_REENTRY_DEPTH: Cell<u32> = const { Cell::new(0) };
}

struct AllocatorReentryGuard;

impl Drop for AllocatorReentryGuard {
    fn drop(&mut self) {
        ALLOCATOR_REENTRY_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

#[inline]
fn enter_allocator_reentry_guard() -> Option<AllocatorReentryGuard> {
    ALLOCATOR_REENTRY_DEPTH
        .try_with(|depth| {
            if depth.get() > 0 {
                None
            } else {
                depth.set(1);
                Some(AllocatorReentryGuard)
            }
        })
        .ok()
        .flatten()
}

/// Violation handler for the process heap: print and abort.
pub fn abort_on_violation(violation: &HeapViolation) {
    report::write_violation(report::STDERR, violation);
    // SAFETY: abort never returns and touches no heap state.
    unsafe { libc::abort() }
}

extern "C" fn report_at_exit() {
    report::write_stats(report::STDOUT, &HEAP.stats());
}

fn getenv_str(name: &CStr) -> Option<&'static str> {
    // SAFETY: name is NUL-terminated; getenv does not allocate.
    let value: *const c_char = unsafe { libc::getenv(name.as_ptr()) };
    if value.is_null() {
        return None;
    }
    // SAFETY: getenv returned a NUL-terminated string owned by the environment.
    unsafe { CStr::from_ptr(value) }.to_str().ok()
}

fn env_lookup(name: &str) -> Option<&'static str> {
    match name {
        ENV_VERBOSE => getenv_str(c"MALLOCVERBOSE"),
        ENV_CHECK => getenv_str(c"MALLOCCHECK"),
        ENV_LOG => getenv_str(c"MALLOCLOG"),
        ENV_GROWTH => getenv_str(c"MALLOCGROWTH"),
        _ => None,
    }
}

/// Reads the environment once and registers the exit report.
fn ensure_configured() {
    if SETUP_STATE.load(Ordering::Acquire) != SETUP_PENDING {
        return;
    }
    if SETUP_STATE
        .compare_exchange(
            SETUP_PENDING,
            SETUP_CONFIGURING,
            Ordering::SeqCst,
            Ordering::Relaxed,
        )
        .is_err()
    {
        return;
    }
    let config = HeapConfig::from_lookup(env_lookup).with_violation_handler(abort_on_violation);
    HEAP.configure(config);
    if config.report_at_exit {
        // SAFETY: report_at_exit is a plain extern "C" fn with no arguments.
        unsafe { libc::atexit(report_at_exit) };
    }
    SETUP_STATE.store(SETUP_READY, Ordering::Release);
}

/// Installs `config` on the process heap, skipping environment setup and
/// the exit report.
pub fn configure(config: HeapConfig) {
    SETUP_STATE.store(SETUP_READY, Ordering::Release);
    HEAP.configure(config);
}

#[must_use]
pub fn stats() -> HeapStats {
    HEAP.stats()
}

/// Allocates `size` bytes, returning 0 on failure.
pub fn allocate(size: usize) -> usize {
    let Some(_guard) = enter_allocator_reentry_guard() else {
        return if size == 0 { 0 } else { bootstrap::allocate(size, 0) };
    };
    ensure_configured();
    HEAP.allocate(size).unwrap_or(0)
}

pub fn allocate_aligned(align: usize, size: usize) -> usize {
    let Some(_guard) = enter_allocator_reentry_guard() else {
        if size == 0 || !align.is_power_of_two() {
            return 0;
        }
        return bootstrap::allocate(size, align);
    };
    ensure_configured();
    HEAP.allocate_aligned(align, size).unwrap_or(0)
}

pub fn zero_allocate(count: usize, elem_size: usize) -> usize {
    let Some(_guard) = enter_allocator_reentry_guard() else {
        // The static arena starts zeroed and is never reused.
        return match count.checked_mul(elem_size) {
            Some(total) if total > 0 => bootstrap::allocate(total, 0),
            _ => 0,
        };
    };
    ensure_configured();
    HEAP.zero_allocate(count, elem_size).unwrap_or(0)
}

/// Releases `addr`. Bootstrap chunks and reentrant releases are leaked.
pub fn release(addr: usize) {
    if addr == 0 || bootstrap::contains(addr) {
        return;
    }
    let Some(_guard) = enter_allocator_reentry_guard() else {
        return;
    };
    ensure_configured();
    HEAP.release(addr);
}

pub fn resize(addr: usize, new_size: usize) -> usize {
    let Some(_guard) = enter_allocator_reentry_guard() else {
        if addr == 0 && new_size != 0 {
            return bootstrap::allocate(new_size, 0);
        }
        return 0;
    };
    ensure_configured();
    if bootstrap::contains(addr) {
        // SAFETY: addr came from the bootstrap arena.
        let old = unsafe { bootstrap::size_of(addr) };
        if new_size == 0 {
            return 0;
        }
        let Some(fresh) = HEAP.allocate(new_size) else {
            return 0;
        };
        // SAFETY: both ranges are live and disjoint; fresh holds new_size bytes.
        unsafe {
            std::ptr::copy_nonoverlapping(addr as *const u8, fresh as *mut u8, old.min(new_size));
        }
        return fresh;
    }
    HEAP.resize(addr, new_size).unwrap_or(0)
}

pub fn usable_size(addr: usize) -> usize {
    if addr == 0 {
        return 0;
    }
    if bootstrap::contains(addr) {
        // SAFETY: addr came from the bootstrap arena.
        return unsafe { bootstrap::size_of(addr) };
    }
    let Some(_guard) = enter_allocator_reentry_guard() else {
        return 0;
    };
    HEAP.usable_size(addr).unwrap_or(0)
}

/// Runs the heap validator; a failure aborts the process.
pub fn check_heap() {
    let Some(_guard) = enter_allocator_reentry_guard() else {
        return;
    };
    ensure_configured();
    HEAP.assert_heap();
}
