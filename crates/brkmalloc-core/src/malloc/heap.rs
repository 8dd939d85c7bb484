//! Allocator facade.
//!
//! [`Heap`] owns the block chain of one heap region and implements the
//! public allocation calls on top of the free list manager. Addresses handed
//! to and from callers are absolute (`source.base_addr() + payload offset`);
//! `0` is the null address.
//!
//! `Heap` itself does no locking. Shared use goes through
//! [`LockedHeap`](super::LockedHeap).

use super::error::HeapError;
use super::header::{BlockRef, BlockState, HEADER_SIZE, block_size_for};
use super::log::{AllocatorLogLevel, AllocatorLogRecord, LifecycleLog};
use super::source::HeapSource;
use super::stats::HeapStats;
use super::validator::HeapViolation;
use crate::config::HeapConfig;

/// Single-region heap allocator state.
pub struct Heap<S> {
    pub(super) source: S,
    pub(super) config: HeapConfig,
    pub(super) initialized: bool,
    /// Lowest-addressed free block.
    pub(super) free_head: Option<BlockRef>,
    /// Highest-addressed free block.
    pub(super) free_tail: Option<BlockRef>,
    /// Highest-addressed block of any state.
    pub(super) last_block: Option<BlockRef>,
    pub(super) stats: HeapStats,
    pub(super) log: LifecycleLog,
    /// First violation found by an automatic check, not yet handled.
    pub(super) violation: Option<HeapViolation>,
}

impl<S: HeapSource> Heap<S> {
    /// Creates an empty heap over `source` with the default configuration.
    pub const fn new(source: S) -> Self {
        Self::with_config(source, HeapConfig::DEFAULT)
    }

    pub const fn with_config(source: S, config: HeapConfig) -> Self {
        Self {
            source,
            config,
            initialized: false,
            free_head: None,
            free_tail: None,
            last_block: None,
            stats: HeapStats::ZERO,
            log: LifecycleLog::new(config.log_level),
            violation: None,
        }
    }

    /// Replaces the configuration. Takes effect from the next call.
    pub fn configure(&mut self, config: HeapConfig) {
        self.config = config;
        self.log.set_min_level(config.log_level);
    }

    #[must_use]
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Idempotent first-use setup, run at the top of every entry point.
    pub fn ensure_initialized(&mut self) {
        if self.initialized {
            return;
        }
        self.initialized = true;
        self.log.set_min_level(self.config.log_level);
        self.record(
            AllocatorLogLevel::Debug,
            "init",
            "heap_init",
            None,
            Some(self.config.growth_increment),
            "ready",
        );
    }

    /// Allocates `size` bytes. Returns `None` for `size == 0` or when the
    /// heap cannot grow.
    pub fn allocate(&mut self, size: usize) -> Option<usize> {
        self.ensure_initialized();
        self.stats.allocate_calls += 1;
        let result = self.try_allocate(size);
        self.settle("malloc", result, size)
    }

    /// Releases the block whose payload starts at `addr`. Null is a no-op.
    ///
    /// Addresses outside the heap, and blocks that are not currently
    /// allocated, are logged and ignored.
    pub fn release(&mut self, addr: usize) {
        self.ensure_initialized();
        self.stats.release_calls += 1;
        if addr == 0 {
            self.record(AllocatorLogLevel::Trace, "free", "free_null", None, None, "noop");
            return;
        }
        match self.block_of(addr) {
            Ok(block) => {
                let size = block.requested(&self.source);
                self.free_block(block);
                self.record(
                    AllocatorLogLevel::Trace,
                    "free",
                    "free",
                    Some(addr),
                    Some(size),
                    "success",
                );
            }
            Err(err) => self.record_error("free", &err, Some(addr), None),
        }
        self.verify();
    }

    /// Moves the allocation at `addr` into a fresh block of `new_size` bytes.
    ///
    /// - null `addr` behaves as [`allocate`](Self::allocate);
    /// - `new_size == 0` releases `addr` and returns `None`;
    /// - if the fresh allocation fails, the old block is left untouched.
    pub fn resize(&mut self, addr: usize, new_size: usize) -> Option<usize> {
        self.ensure_initialized();
        self.stats.resize_calls += 1;
        if addr == 0 {
            let result = self.try_allocate(new_size);
            return self.settle("realloc", result, new_size);
        }
        let old = match self.block_of(addr) {
            Ok(block) => block,
            Err(err) => {
                self.record_error("realloc", &err, Some(addr), Some(new_size));
                self.verify();
                return None;
            }
        };
        if new_size == 0 {
            self.free_block(old);
            self.record(
                AllocatorLogLevel::Trace,
                "realloc",
                "resize_to_zero",
                Some(addr),
                Some(0),
                "released",
            );
            self.verify();
            return None;
        }
        let result = self.try_allocate(new_size).map(|fresh| {
            let keep = (old.size(&self.source) - HEADER_SIZE).min(new_size);
            self.source
                .copy_within(old.payload_offset(), fresh.payload_offset(), keep);
            self.free_block(old);
            fresh
        });
        self.settle("realloc", result, new_size)
    }

    /// Allocates `count * elem_size` zeroed bytes.
    pub fn zero_allocate(&mut self, count: usize, elem_size: usize) -> Option<usize> {
        self.ensure_initialized();
        self.stats.zero_allocate_calls += 1;
        let result = count
            .checked_mul(elem_size)
            .ok_or(HeapError::SizeOverflow)
            .and_then(|total| self.try_allocate(total))
            .inspect(|block| {
                let usable = block.size(&self.source) - HEADER_SIZE;
                self.source.fill(block.payload_offset(), usable, 0);
            });
        self.settle("calloc", result, count.saturating_mul(elem_size))
    }

    /// Allocates `size` bytes whose address is a multiple of `align`.
    pub fn allocate_aligned(&mut self, align: usize, size: usize) -> Option<usize> {
        self.ensure_initialized();
        self.stats.aligned_allocate_calls += 1;
        let result = self.try_allocate_aligned(align, size);
        self.settle("memalign", result, size)
    }

    /// Requested size of the live allocation at `addr`.
    pub fn object_size(&self, addr: usize) -> Option<usize> {
        let block = self.block_of(addr).ok()?;
        Some(block.requested(&self.source))
    }

    /// Bytes usable at `addr`: the block payload, header excluded.
    pub fn usable_size(&self, addr: usize) -> Option<usize> {
        let block = self.block_of(addr).ok()?;
        Some(block.size(&self.source) - HEADER_SIZE)
    }

    #[must_use]
    pub fn stats(&self) -> HeapStats {
        HeapStats {
            heap_size: self.source.extent(),
            ..self.stats
        }
    }

    /// Runs the validator and hands a failure to the configured handler.
    pub fn assert_heap(&mut self) {
        if let Err(violation) = self.check_heap() {
            (self.config.violation_handler)(&violation);
        }
    }

    /// Takes the violation recorded by an automatic check, if any.
    pub fn take_violation(&mut self) -> Option<HeapViolation> {
        self.violation.take()
    }

    pub(crate) fn defer_violation(&mut self, violation: HeapViolation) {
        self.violation.get_or_insert(violation);
    }

    /// Retained lifecycle records, oldest first.
    pub fn lifecycle_logs(&self) -> impl Iterator<Item = &AllocatorLogRecord> {
        self.log.iter()
    }

    /// Removes and returns the retained lifecycle records, oldest first.
    pub fn drain_lifecycle_logs(&mut self) -> Vec<AllocatorLogRecord> {
        self.log.drain()
    }

    /// Lifecycle records lost to ring overflow.
    #[must_use]
    pub fn dropped_log_records(&self) -> u64 {
        self.log.dropped()
    }

    #[must_use]
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Direct access to the heap bytes. Writing block headers through this
    /// corrupts the heap.
    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    fn try_allocate(&mut self, size: usize) -> Result<BlockRef, HeapError> {
        let needed = Self::needed_for(size)?;
        let block = match self.find_fit(needed) {
            Some(block) => block,
            None => self.grow(needed)?,
        };
        self.claim(block, needed, size);
        Ok(block)
    }

    fn try_allocate_aligned(&mut self, align: usize, size: usize) -> Result<BlockRef, HeapError> {
        if !align.is_power_of_two() {
            return Err(HeapError::InvalidAlignment(align));
        }
        if align <= super::header::ALIGN {
            return self.try_allocate(size);
        }
        let needed = Self::needed_for(size)?;
        let (block, lead) = match self.find_fit_aligned(needed, align) {
            Some(hit) => hit,
            None => {
                let padded = needed
                    .checked_add(align)
                    .and_then(|n| n.checked_add(super::header::MIN_BLOCK))
                    .ok_or(HeapError::SizeOverflow)?;
                let block = self.grow(padded)?;
                let lead = self.leading_gap(block, align).ok_or(HeapError::SizeOverflow)?;
                (block, lead)
            }
        };
        let block = self.split_leading(block, lead);
        self.claim(block, needed, size);
        Ok(block)
    }

    fn needed_for(size: usize) -> Result<usize, HeapError> {
        if size == 0 {
            return Err(HeapError::InvalidSize);
        }
        block_size_for(size)
            .filter(|&needed| needed <= isize::MAX as usize)
            .ok_or(HeapError::SizeOverflow)
    }

    /// Recovers the header of the live block whose payload is at `addr`.
    ///
    /// This is the one place a caller-supplied address is turned into block
    /// metadata. The address must land inside the heap on a payload boundary
    /// and the header there must be tagged allocated.
    pub(super) fn block_of(&self, addr: usize) -> Result<BlockRef, HeapError> {
        let offset = self
            .source
            .offset_of(addr)
            .filter(|&off| off >= HEADER_SIZE && off % super::header::ALIGN == 0)
            .ok_or(HeapError::ForeignPointer(addr))?;
        let block = BlockRef::at(offset - HEADER_SIZE);
        match block.state(&self.source) {
            Some(BlockState::Allocated) => Ok(block),
            Some(BlockState::Free) => Err(HeapError::DoubleFree(addr)),
            None => Err(HeapError::InvalidState {
                addr,
                tag: block.tag(&self.source),
            }),
        }
    }

    pub(super) fn addr_of(&self, block: BlockRef) -> usize {
        self.source.base_addr() + block.payload_offset()
    }

    /// Marks `block` allocated for `requested` bytes, splitting off the
    /// tail when it can stand alone as a free block.
    fn claim(&mut self, block: BlockRef, needed: usize, requested: usize) {
        self.split(block, needed);
        block.set_state(&mut self.source, BlockState::Allocated);
        block.set_requested(&mut self.source, requested);
        self.stats.active_count += 1;
        self.stats.total_allocated += requested;
    }

    fn free_block(&mut self, block: BlockRef) {
        let requested = block.requested(&self.source);
        self.stats.active_count = self.stats.active_count.saturating_sub(1);
        self.stats.total_allocated = self.stats.total_allocated.saturating_sub(requested);
        block.set_requested(&mut self.source, 0);
        block.set_state(&mut self.source, BlockState::Free);
        self.coalesce(block);
    }

    fn settle(
        &mut self,
        symbol: &'static str,
        result: Result<BlockRef, HeapError>,
        size: usize,
    ) -> Option<usize> {
        let out = match result {
            Ok(block) => {
                let addr = self.addr_of(block);
                self.record(
                    AllocatorLogLevel::Trace,
                    symbol,
                    "alloc",
                    Some(addr),
                    Some(size),
                    "success",
                );
                Some(addr)
            }
            Err(err) => {
                self.record_error(symbol, &err, None, Some(size));
                None
            }
        };
        self.verify();
        out
    }

    /// Automatic validation after a mutating call.
    fn verify(&mut self) {
        if !self.config.check_mode.checks_every_operation() || self.violation.is_some() {
            return;
        }
        if let Err(violation) = self.check_heap() {
            self.record(
                AllocatorLogLevel::Error,
                "check_heap",
                "heap_violation",
                Some(violation.addr),
                None,
                "failed",
            );
            self.violation = Some(violation);
        }
    }

    pub(super) fn record(
        &mut self,
        level: AllocatorLogLevel,
        symbol: &'static str,
        event: &'static str,
        ptr: Option<usize>,
        size: Option<usize>,
        outcome: &'static str,
    ) {
        self.log.push(AllocatorLogRecord {
            decision_id: 0,
            level,
            symbol,
            event,
            ptr,
            size,
            outcome,
            heap_size: self.source.extent(),
            active_count: self.stats.active_count,
        });
    }

    fn record_error(
        &mut self,
        symbol: &'static str,
        err: &HeapError,
        ptr: Option<usize>,
        size: Option<usize>,
    ) {
        self.record(err.level(), symbol, err.event(), ptr, size, err.outcome());
    }
}
