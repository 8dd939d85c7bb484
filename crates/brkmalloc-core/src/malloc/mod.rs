//! Memory allocation.
//!
//! Implements the malloc family on top of one growable heap region:
//! - `header`: block header layout and typed accessors
//! - `source`: the heap source trait and the in-memory source
//! - `free_list`: first-fit search, splitting, coalescing and growth
//! - `heap`: the allocator facade (allocate / release / resize / zero-allocate)
//! - `validator`: full-chain consistency sweep
//! - `locked`: the process-wide mutual-exclusion guard

pub mod error;
mod free_list;
pub mod header;
pub mod heap;
pub mod locked;
pub mod log;
pub mod source;
pub mod stats;
pub mod validator;

pub use error::HeapError;
pub use header::{ALIGN, BlockRef, BlockState, HEADER_SIZE, MIN_BLOCK, MIN_PAYLOAD};
pub use heap::Heap;
pub use locked::LockedHeap;
pub use log::{AllocatorLogLevel, AllocatorLogRecord, LOG_CAPACITY};
pub use source::{HeapSource, VecHeapSource};
pub use stats::HeapStats;
pub use validator::{HeapCheck, HeapViolation, ViolationKind};
