//! # brkmalloc-core
//!
//! Safe bookkeeping for a single-heap, list-based memory allocator.
//!
//! The heap is one contiguous region that only ever grows. It is tiled by
//! blocks, each prefixed by a fixed header, and addressed by byte offset from
//! the start of the region. Free blocks are additionally threaded onto an
//! address-ordered free list. Requests are served first-fit, oversized blocks
//! are split, and released blocks are coalesced with their free neighbors.
//!
//! # Architecture
//!
//! ```text
//! caller -> LockedHeap (parking_lot guard) -> Heap facade
//!        -> free list (search / split / coalesce) -> HeapSource::grow on miss
//! ```
//!
//! No `unsafe` code is permitted at the crate level. Raw memory access lives
//! behind the [`HeapSource`] trait; the in-memory [`VecHeapSource`] is fully
//! safe, while the process heap implementation lives in `brkmalloc-abi`.

#![deny(unsafe_code)]

pub mod config;
pub mod malloc;
#[allow(unsafe_code)]
#[cfg(all(target_arch = "x86_64", target_os = "linux"))]
pub mod syscall;

pub use config::{CheckMode, HeapConfig, ViolationHandler};
pub use malloc::{
    ALIGN, AllocatorLogLevel, AllocatorLogRecord, BlockRef, BlockState, HEADER_SIZE, Heap,
    HeapCheck, HeapError, HeapSource, HeapStats, HeapViolation, LockedHeap, MIN_BLOCK,
    MIN_PAYLOAD, VecHeapSource, ViolationKind,
};
