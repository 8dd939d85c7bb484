// Every extern "C" entry point takes raw pointers from C callers; the heap
// rejects addresses it does not own, so per-function safety docs would only
// repeat the same contract.
#![allow(clippy::missing_safety_doc)]
//! # brkmalloc-abi
//!
//! The process heap: a [`LockedHeap`](brkmalloc_core::LockedHeap) over the
//! program data segment, exported as the C allocation symbols.
//!
//! ```text
//! C caller -> extern "C" malloc (this crate) -> reentry guard
//!          -> LockedHeap<BrkHeapSource> -> brk(2) on growth
//! ```
//!
//! Symbols are exported with `no_mangle` in release builds only, so debug
//! test binaries keep the platform allocator.

pub mod bootstrap;
pub mod brk_source;
pub mod global;
pub mod heap_state;
pub mod report;

// Exports malloc/free/...; kept out of the unit-test binary so it does not
// replace the allocator of the test harness itself.
#[cfg(not(test))]
pub mod malloc_abi;

pub use brk_source::BrkHeapSource;
pub use global::BrkMalloc;
