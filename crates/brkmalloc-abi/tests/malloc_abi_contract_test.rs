//! Contract tests for the C allocation entry points.
//!
//! The whole file shares the process heap, which grows the real data segment.
//! `setup` gives it one large growth increment so that every test here fits
//! inside the first extension of the break.

use std::alloc::{GlobalAlloc, Layout};
use std::ffi::c_void;
use std::ptr;
use std::sync::Once;

use brkmalloc_abi::BrkMalloc;
use brkmalloc_abi::heap_state::{self, abort_on_violation};
use brkmalloc_abi::malloc_abi::{
    aligned_alloc, calloc, checkHeap, free, malloc, malloc_usable_size, memalign,
    posix_memalign, realloc, valloc,
};
use brkmalloc_core::{CheckMode, HeapConfig};

static SETUP: Once = Once::new();

fn setup() {
    SETUP.call_once(|| {
        heap_state::configure(
            HeapConfig::DEFAULT
                .with_growth_increment(8 << 20)
                .with_check_mode(CheckMode::EveryOperation)
                .with_report_at_exit(false)
                .with_violation_handler(abort_on_violation),
        );
    });
}

fn errno() -> i32 {
    // SAFETY: returns this thread's errno slot.
    unsafe { *libc::__errno_location() }
}

fn clear_errno() {
    // SAFETY: returns this thread's errno slot.
    unsafe { *libc::__errno_location() = 0 };
}

#[test]
fn malloc_returns_aligned_writable_memory() {
    setup();
    for size in [1usize, 15, 16, 17, 255, 4096] {
        // SAFETY: exercising the C allocation contract.
        unsafe {
            let p = malloc(size);
            assert!(!p.is_null(), "size {size}");
            assert_eq!(p as usize % 16, 0);
            assert!(malloc_usable_size(p) >= size);
            ptr::write_bytes(p.cast::<u8>(), 0xA5, size);
            free(p);
        }
    }
    checkHeap();
}

#[test]
fn malloc_zero_returns_null() {
    setup();
    // SAFETY: exercising the C allocation contract.
    unsafe {
        assert!(malloc(0).is_null());
    }
}

#[test]
fn free_null_is_noop() {
    setup();
    // SAFETY: free(NULL) is always allowed.
    unsafe {
        free(ptr::null_mut());
        free(ptr::null_mut());
    }
    checkHeap();
}

#[test]
fn malloc_usable_size_of_null_is_zero() {
    setup();
    // SAFETY: null is accepted.
    assert_eq!(unsafe { malloc_usable_size(ptr::null_mut()) }, 0);
}

#[test]
fn realloc_preserves_contents() {
    setup();
    // SAFETY: exercising the C allocation contract.
    unsafe {
        let p = malloc(32).cast::<u8>();
        for i in 0..32u8 {
            *p.add(i as usize) = i;
        }
        let q = realloc(p.cast(), 1000).cast::<u8>();
        assert!(!q.is_null());
        for i in 0..32u8 {
            assert_eq!(*q.add(i as usize), i);
        }
        let r = realloc(q.cast(), 8).cast::<u8>();
        assert!(!r.is_null());
        for i in 0..8u8 {
            assert_eq!(*r.add(i as usize), i);
        }
        free(r.cast());
    }
    checkHeap();
}

#[test]
fn realloc_null_and_zero_edges() {
    setup();
    // SAFETY: exercising the C allocation contract.
    unsafe {
        let p = realloc(ptr::null_mut(), 64);
        assert!(!p.is_null());
        assert!(malloc_usable_size(p) >= 64);
        assert!(realloc(p, 0).is_null());
    }
    checkHeap();
}

#[test]
fn calloc_zeroes_and_rejects_overflow() {
    setup();
    // SAFETY: exercising the C allocation contract.
    unsafe {
        let dirty = malloc(512).cast::<u8>();
        ptr::write_bytes(dirty, 0xFF, 512);
        free(dirty.cast());

        let p = calloc(64, 8).cast::<u8>();
        assert!(!p.is_null());
        assert!((0..512).all(|i| *p.add(i) == 0));
        free(p.cast());

        clear_errno();
        assert!(calloc(usize::MAX, 2).is_null());
        assert_eq!(errno(), libc::ENOMEM);
        assert!(calloc(0, 16).is_null());
    }
    checkHeap();
}

#[test]
fn huge_malloc_fails_with_enomem() {
    setup();
    clear_errno();
    // SAFETY: exercising the C allocation contract.
    unsafe {
        assert!(malloc(usize::MAX / 2).is_null());
    }
    assert_eq!(errno(), libc::ENOMEM);
}

#[test]
fn posix_memalign_contract() {
    setup();
    let mut out: *mut c_void = ptr::null_mut();
    // SAFETY: `out` is a valid pointer slot.
    unsafe {
        assert_eq!(posix_memalign(&mut out, 3, 16), libc::EINVAL);
        assert_eq!(posix_memalign(&mut out, 4, 16), libc::EINVAL);
        for align in [8usize, 16, 64, 256, 4096] {
            assert_eq!(posix_memalign(&mut out, align, 100), 0);
            assert!(!out.is_null());
            assert_eq!(out as usize % align, 0, "align {align}");
            free(out);
        }
    }
    checkHeap();
}

#[test]
fn aligned_variants_honor_alignment() {
    setup();
    // SAFETY: exercising the C allocation contract.
    unsafe {
        let a = aligned_alloc(128, 256);
        assert_eq!(a as usize % 128, 0);
        let m = memalign(512, 10);
        assert_eq!(m as usize % 512, 0);
        let v = valloc(100);
        let page = libc::sysconf(libc::_SC_PAGESIZE) as usize;
        assert_eq!(v as usize % page, 0);
        assert!(aligned_alloc(24, 8).is_null());
        free(a);
        free(m);
        free(v);
    }
    checkHeap();
}

#[test]
fn global_alloc_round_trip() {
    setup();
    let heap = BrkMalloc;
    let layout = Layout::from_size_align(200, 8).unwrap();
    let big = Layout::from_size_align(64, 1024).unwrap();
    // SAFETY: layouts are non-zero sized; pointers are released once.
    unsafe {
        let p = heap.alloc_zeroed(layout);
        assert!(!p.is_null());
        assert!((0..200).all(|i| *p.add(i) == 0));
        *p = 7;
        let q = heap.realloc(p, layout, 4000);
        assert_eq!(*q, 7);
        heap.dealloc(q, Layout::from_size_align(4000, 8).unwrap());

        let a = heap.alloc(big);
        assert_eq!(a as usize % 1024, 0);
        *a = 9;
        let b = heap.realloc(a, big, 128);
        assert_eq!(b as usize % 1024, 0);
        assert_eq!(*b, 9);
        heap.dealloc(b, Layout::from_size_align(128, 1024).unwrap());
    }
    checkHeap();
}

#[test]
fn stats_count_calls() {
    setup();
    let before = heap_state::stats();
    // SAFETY: exercising the C allocation contract.
    unsafe {
        let p = malloc(10);
        let q = realloc(p, 20);
        let r = calloc(2, 2);
        free(q);
        free(r);
    }
    let after = heap_state::stats();
    assert!(after.allocate_calls > before.allocate_calls);
    assert!(after.resize_calls > before.resize_calls);
    assert!(after.zero_allocate_calls > before.zero_allocate_calls);
    assert!(after.release_calls >= before.release_calls + 2);
    assert!(after.heap_size >= 8 << 20);
}
