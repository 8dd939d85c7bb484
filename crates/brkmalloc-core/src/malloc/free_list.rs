//! Free list manager.
//!
//! Free blocks form a doubly linked list sorted by address, threaded through
//! the first two payload words of each free block. Allocation takes the first
//! block that is large enough; release merges with free physical neighbors so
//! no two free blocks are ever adjacent.

use super::error::HeapError;
use super::header::{ALIGN, BlockRef, BlockState, MIN_BLOCK, align_up};
use super::heap::Heap;
use super::log::AllocatorLogLevel;
use super::source::HeapSource;

impl<S: HeapSource> Heap<S> {
    /// First free block, in address order, of at least `needed` bytes.
    pub(super) fn find_fit(&self, needed: usize) -> Option<BlockRef> {
        let mut cursor = self.free_head;
        while let Some(block) = cursor {
            if block.size(&self.source) >= needed {
                return Some(block);
            }
            cursor = block.next_free(&self.source);
        }
        None
    }

    /// First free block that can host `needed` bytes at an `align` boundary,
    /// with the leading gap it must give up.
    pub(super) fn find_fit_aligned(&self, needed: usize, align: usize) -> Option<(BlockRef, usize)> {
        let mut cursor = self.free_head;
        while let Some(block) = cursor {
            if let Some(lead) = self.leading_gap(block, align) {
                let fits = lead
                    .checked_add(needed)
                    .is_some_and(|total| total <= block.size(&self.source));
                if fits {
                    return Some((block, lead));
                }
            }
            cursor = block.next_free(&self.source);
        }
        None
    }

    /// Bytes to skip at the front of `block` so that its payload lands on
    /// an `align` boundary. A non-zero gap is always large enough to stand
    /// as a free block of its own.
    pub(super) fn leading_gap(&self, block: BlockRef, align: usize) -> Option<usize> {
        let payload = self.addr_of(block);
        if payload % align == 0 {
            return Some(0);
        }
        let target = payload.checked_add(MIN_BLOCK)?.checked_add(align - 1)? & !(align - 1);
        Some(target - payload)
    }

    /// Splits `lead` bytes off the front of free `block`, returning the
    /// free block that follows the gap.
    pub(super) fn split_leading(&mut self, block: BlockRef, lead: usize) -> BlockRef {
        if lead == 0 {
            return block;
        }
        let size = block.size(&self.source);
        let rest = BlockRef::at(block.offset() + lead);
        block.set_size(&mut self.source, lead);
        rest.write_header(&mut self.source, size - lead, lead, BlockState::Free);
        self.insert_free_after(block, rest);
        self.link_successor(rest);
        if self.last_block == Some(block) {
            self.last_block = Some(rest);
        }
        rest
    }

    /// Takes free `block` off the free list, first carving its tail into a
    /// new free block when the remainder can hold a header and the minimum
    /// payload.
    pub(super) fn split(&mut self, block: BlockRef, needed: usize) {
        let size = block.size(&self.source);
        let remainder = size - needed;
        if remainder < MIN_BLOCK {
            self.unlink_free(block);
            return;
        }
        let rest = BlockRef::at(block.offset() + needed);
        rest.write_header(&mut self.source, remainder, needed, BlockState::Free);
        self.replace_free(block, rest);
        block.set_size(&mut self.source, needed);
        self.link_successor(rest);
        if self.last_block == Some(block) {
            self.last_block = Some(rest);
        }
    }

    /// Merges the just-released `block` with its free physical neighbors
    /// and files the result on the free list.
    pub(super) fn coalesce(&mut self, block: BlockRef) -> BlockRef {
        let prev = self.phys_prev(block).filter(|b| b.is_free(&self.source));
        let next = self.phys_next(block).filter(|b| b.is_free(&self.source));

        let merged = match (prev, next) {
            (Some(prev), Some(next)) => {
                self.unlink_free(next);
                let size = prev.size(&self.source)
                    + block.size(&self.source)
                    + next.size(&self.source);
                prev.set_size(&mut self.source, size);
                prev
            }
            (Some(prev), None) => {
                let size = prev.size(&self.source) + block.size(&self.source);
                prev.set_size(&mut self.source, size);
                prev
            }
            (None, Some(next)) => {
                self.replace_free(next, block);
                let size = block.size(&self.source) + next.size(&self.source);
                block.set_size(&mut self.source, size);
                block
            }
            (None, None) => {
                self.insert_free_ordered(block);
                block
            }
        };

        if self.phys_next(merged).is_none() {
            self.last_block = Some(merged);
        }
        self.link_successor(merged);
        merged
    }

    /// Extends the heap so that a free block of at least `needed` bytes
    /// exists at its end, and returns that block.
    ///
    /// A free tail block is extended in place; otherwise the new bytes become
    /// a fresh free block after the last one.
    pub(super) fn grow(&mut self, needed: usize) -> Result<BlockRef, HeapError> {
        let tail = self.last_block.filter(|b| b.is_free(&self.source));
        let deficit = match tail {
            Some(tail) => needed.saturating_sub(tail.size(&self.source)),
            None => needed,
        };
        let bytes = align_up(deficit.max(self.config.growth_increment).max(MIN_BLOCK))
            .ok_or(HeapError::SizeOverflow)?;

        let expected = self.source.extent();
        let offset = self.source.grow(bytes)?;
        if offset != expected {
            return Err(HeapError::Discontiguous {
                expected: self.source.base_addr() + expected,
                found: self.source.base_addr() + offset,
            });
        }

        let block = match tail {
            Some(tail) => {
                let size = tail.size(&self.source) + bytes;
                tail.set_size(&mut self.source, size);
                tail
            }
            None => {
                let block = BlockRef::at(offset);
                let prev_size = self.last_block.map_or(0, |b| b.size(&self.source));
                block.write_header(&mut self.source, bytes, prev_size, BlockState::Free);
                self.push_free_tail(block);
                self.last_block = Some(block);
                block
            }
        };
        self.record(
            AllocatorLogLevel::Debug,
            "grow",
            "heap_grow",
            Some(self.source.base_addr() + offset),
            Some(bytes),
            "success",
        );
        Ok(block)
    }

    /// Physical successor, if `block` is not the last block.
    pub(super) fn phys_next(&self, block: BlockRef) -> Option<BlockRef> {
        let end = block.end(&self.source);
        (end < self.source.extent()).then_some(BlockRef::at(end))
    }

    /// Physical predecessor, if `block` is not the first block.
    pub(super) fn phys_prev(&self, block: BlockRef) -> Option<BlockRef> {
        (block.offset() != 0)
            .then(|| BlockRef::at(block.offset() - block.prev_size(&self.source)))
    }

    /// Refreshes the back link of `block`'s physical successor.
    fn link_successor(&mut self, block: BlockRef) {
        if let Some(next) = self.phys_next(block) {
            let size = block.size(&self.source);
            next.set_prev_size(&mut self.source, size);
        }
    }

    /// Inserts `block` at its address position in the free list.
    fn insert_free_ordered(&mut self, block: BlockRef) {
        let mut cursor = self.free_head;
        while let Some(node) = cursor {
            if node > block {
                self.insert_free_before(node, block);
                return;
            }
            cursor = node.next_free(&self.source);
        }
        self.push_free_tail(block);
    }

    fn insert_free_before(&mut self, node: BlockRef, block: BlockRef) {
        let prev = node.prev_free(&self.source);
        block.set_prev_free(&mut self.source, prev);
        block.set_next_free(&mut self.source, Some(node));
        node.set_prev_free(&mut self.source, Some(block));
        match prev {
            Some(prev) => prev.set_next_free(&mut self.source, Some(block)),
            None => self.free_head = Some(block),
        }
    }

    fn insert_free_after(&mut self, node: BlockRef, block: BlockRef) {
        let next = node.next_free(&self.source);
        block.set_prev_free(&mut self.source, Some(node));
        block.set_next_free(&mut self.source, next);
        node.set_next_free(&mut self.source, Some(block));
        match next {
            Some(next) => next.set_prev_free(&mut self.source, Some(block)),
            None => self.free_tail = Some(block),
        }
    }

    fn push_free_tail(&mut self, block: BlockRef) {
        let tail = self.free_tail;
        block.set_prev_free(&mut self.source, tail);
        block.set_next_free(&mut self.source, None);
        match tail {
            Some(tail) => tail.set_next_free(&mut self.source, Some(block)),
            None => self.free_head = Some(block),
        }
        self.free_tail = Some(block);
    }

    fn unlink_free(&mut self, block: BlockRef) {
        let prev = block.prev_free(&self.source);
        let next = block.next_free(&self.source);
        match prev {
            Some(prev) => prev.set_next_free(&mut self.source, next),
            None => self.free_head = next,
        }
        match next {
            Some(next) => next.set_prev_free(&mut self.source, prev),
            None => self.free_tail = prev,
        }
    }

    /// Puts `new` in the free-list position of `old`. Only valid when no
    /// other free block lies between the two addresses.
    fn replace_free(&mut self, old: BlockRef, new: BlockRef) {
        let prev = old.prev_free(&self.source);
        let next = old.next_free(&self.source);
        new.set_prev_free(&mut self.source, prev);
        new.set_next_free(&mut self.source, next);
        match prev {
            Some(prev) => prev.set_next_free(&mut self.source, Some(new)),
            None => self.free_head = Some(new),
        }
        match next {
            Some(next) => next.set_prev_free(&mut self.source, Some(new)),
            None => self.free_tail = Some(new),
        }
    }
}
