//! Heap validator.
//!
//! Walks the whole block chain from offset 0 to the extent and checks:
//! - blocks tile the region exactly and every back link matches;
//! - every header carries a valid state tag and a sane size;
//! - no two free blocks are adjacent;
//! - the free list is exactly the free blocks, in address order;
//! - the allocation counters agree with the chain.

use thiserror::Error;

use super::header::{ALIGN, BlockRef, BlockState, HEADER_SIZE, MIN_BLOCK};
use super::heap::Heap;
use super::source::HeapSource;

/// Summary of a successful walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapCheck {
    pub blocks: usize,
    pub free_blocks: usize,
    pub allocated_blocks: usize,
    /// Total size of free blocks, headers included.
    pub free_bytes: usize,
    /// Requested bytes of allocated blocks.
    pub allocated_bytes: usize,
    pub heap_size: usize,
}

/// First invariant broken during a walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("heap violation at block {addr:#x} (offset {offset:#x}): {kind}")]
pub struct HeapViolation {
    /// Heap offset of the offending block header.
    pub offset: usize,
    /// Absolute address of the offending block header.
    pub addr: usize,
    pub kind: ViolationKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ViolationKind {
    #[error("invalid state tag {tag:#x}")]
    InvalidState { tag: usize },
    #[error("bad block size {size}")]
    BadSize { size: usize },
    #[error("block of {size} bytes overruns the heap extent {extent}")]
    Overrun { size: usize, extent: usize },
    #[error("stored predecessor size {stored} does not match {actual}")]
    BrokenBackLink { stored: usize, actual: usize },
    #[error("free block follows another free block")]
    AdjacentFree,
    #[error("requested size {requested} exceeds payload capacity {capacity}")]
    RequestedOverflow { requested: usize, capacity: usize },
    #[error("free list expected {expected:?} but the chain has a free block here")]
    FreeListMismatch { expected: Option<usize> },
    #[error("free list back link does not point at the previous free block")]
    FreeListBackLink,
    #[error("free list continues past the last free block")]
    FreeListExtra,
    #[error("recorded tail {recorded:?} does not match the chain tail {actual:?}")]
    TailMismatch {
        recorded: Option<usize>,
        actual: Option<usize>,
    },
    #[error("chain holds {counted} allocated blocks but {recorded} are recorded")]
    CounterMismatch { counted: usize, recorded: usize },
}

impl<S: HeapSource> Heap<S> {
    /// Walks the heap and reports the first broken invariant.
    pub fn check_heap(&self) -> Result<HeapCheck, HeapViolation> {
        let source = &self.source;
        let extent = source.extent();
        let base = source.base_addr();
        let fail = |offset: usize, kind| HeapViolation {
            offset,
            addr: base + offset,
            kind,
        };

        let mut summary = HeapCheck {
            heap_size: extent,
            ..HeapCheck::default()
        };
        let mut offset = 0;
        let mut prev_size = 0;
        let mut prev_was_free = false;
        let mut expected_free = self.free_head;
        let mut last_free: Option<BlockRef> = None;
        let mut last: Option<BlockRef> = None;

        while offset < extent {
            let block = BlockRef::at(offset);
            if extent - offset < MIN_BLOCK {
                return Err(fail(offset, ViolationKind::BadSize { size: extent - offset }));
            }
            let Some(state) = block.state(source) else {
                return Err(fail(
                    offset,
                    ViolationKind::InvalidState {
                        tag: block.tag(source),
                    },
                ));
            };
            let size = block.size(source);
            if size < MIN_BLOCK || size % ALIGN != 0 {
                return Err(fail(offset, ViolationKind::BadSize { size }));
            }
            if size > extent - offset {
                return Err(fail(offset, ViolationKind::Overrun { size, extent }));
            }
            let stored = block.prev_size(source);
            if stored != prev_size {
                return Err(fail(
                    offset,
                    ViolationKind::BrokenBackLink {
                        stored,
                        actual: prev_size,
                    },
                ));
            }

            match state {
                BlockState::Free => {
                    if prev_was_free {
                        return Err(fail(offset, ViolationKind::AdjacentFree));
                    }
                    if expected_free != Some(block) {
                        return Err(fail(
                            offset,
                            ViolationKind::FreeListMismatch {
                                expected: expected_free.map(BlockRef::offset),
                            },
                        ));
                    }
                    if block.prev_free(source) != last_free {
                        return Err(fail(offset, ViolationKind::FreeListBackLink));
                    }
                    last_free = Some(block);
                    expected_free = block.next_free(source);
                    summary.free_blocks += 1;
                    summary.free_bytes += size;
                }
                BlockState::Allocated => {
                    let requested = block.requested(source);
                    let capacity = size - HEADER_SIZE;
                    if requested > capacity {
                        return Err(fail(
                            offset,
                            ViolationKind::RequestedOverflow {
                                requested,
                                capacity,
                            },
                        ));
                    }
                    summary.allocated_blocks += 1;
                    summary.allocated_bytes += requested;
                }
            }

            summary.blocks += 1;
            prev_was_free = state == BlockState::Free;
            prev_size = size;
            last = Some(block);
            offset += size;
        }

        if let Some(extra) = expected_free {
            return Err(fail(extra.offset(), ViolationKind::FreeListExtra));
        }
        if self.free_tail != last_free {
            return Err(fail(
                self.free_tail.map_or(0, BlockRef::offset),
                ViolationKind::TailMismatch {
                    recorded: self.free_tail.map(BlockRef::offset),
                    actual: last_free.map(BlockRef::offset),
                },
            ));
        }
        if self.last_block != last {
            return Err(fail(
                self.last_block.map_or(0, BlockRef::offset),
                ViolationKind::TailMismatch {
                    recorded: self.last_block.map(BlockRef::offset),
                    actual: last.map(BlockRef::offset),
                },
            ));
        }
        if summary.allocated_blocks != self.stats.active_count {
            return Err(fail(
                0,
                ViolationKind::CounterMismatch {
                    counted: summary.allocated_blocks,
                    recorded: self.stats.active_count,
                },
            ));
        }
        Ok(summary)
    }
}
