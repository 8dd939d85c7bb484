//! Heap sources.
//!
//! A [`HeapSource`] owns the bytes of the heap region and knows how to extend
//! it. Everything above this trait addresses the region by byte offset from
//! [`HeapSource::base_addr`]; only the source turns offsets into memory.

use super::error::HeapError;
use super::header::{ALIGN, WORD};

/// Backing store for one contiguous, grow-only heap region.
///
/// Offsets passed to the accessors are always inside `0..extent()`, and word
/// accessors are only used at word-aligned offsets.
pub trait HeapSource {
    /// Address of offset 0, as handed out to callers.
    fn base_addr(&self) -> usize;

    /// Current size of the region in bytes.
    fn extent(&self) -> usize;

    /// Extends the region by `bytes` (a multiple of `ALIGN`).
    ///
    /// Returns the offset where the new bytes begin, which is always the
    /// previous extent.
    fn grow(&mut self, bytes: usize) -> Result<usize, HeapError>;

    fn read_word(&self, offset: usize) -> usize;

    fn write_word(&mut self, offset: usize, value: usize);

    /// Copies `len` bytes from `src` to `dst`. The ranges may overlap.
    fn copy_within(&mut self, src: usize, dst: usize, len: usize);

    fn fill(&mut self, offset: usize, len: usize, byte: u8);

    /// Translates an address into an offset inside the region.
    fn offset_of(&self, addr: usize) -> Option<usize> {
        let offset = addr.checked_sub(self.base_addr())?;
        (offset < self.extent()).then_some(offset)
    }
}

/// Safe in-memory heap source with a fixed capacity.
///
/// Addresses are logical: the region pretends to start at `base_addr`, so
/// pointers handed out look like real heap addresses without aliasing any
/// real memory.
#[derive(Debug, Clone)]
pub struct VecHeapSource {
    bytes: Vec<u8>,
    capacity: usize,
    base_addr: usize,
    grow_calls: u64,
}

impl VecHeapSource {
    /// Logical base address, kept above the zero page.
    pub const DEFAULT_BASE_ADDR: usize = 0x1_0000;

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_base_addr(Self::DEFAULT_BASE_ADDR, capacity)
    }

    /// `base_addr` is rounded up to `ALIGN`.
    #[must_use]
    pub fn with_base_addr(base_addr: usize, capacity: usize) -> Self {
        let base_addr = (base_addr + ALIGN - 1) & !(ALIGN - 1);
        Self {
            bytes: Vec::new(),
            capacity,
            base_addr,
            grow_calls: 0,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of successful `grow` calls so far.
    #[must_use]
    pub fn grow_calls(&self) -> u64 {
        self.grow_calls
    }

    /// Borrows `len` bytes starting at heap address `addr`.
    ///
    /// Returns `None` when the range leaves the region.
    #[must_use]
    pub fn payload(&self, addr: usize, len: usize) -> Option<&[u8]> {
        let start = addr.checked_sub(self.base_addr)?;
        let end = start.checked_add(len)?;
        self.bytes.get(start..end)
    }

    #[must_use]
    pub fn payload_mut(&mut self, addr: usize, len: usize) -> Option<&mut [u8]> {
        let start = addr.checked_sub(self.base_addr)?;
        let end = start.checked_add(len)?;
        self.bytes.get_mut(start..end)
    }
}

impl HeapSource for VecHeapSource {
    fn base_addr(&self) -> usize {
        self.base_addr
    }

    fn extent(&self) -> usize {
        self.bytes.len()
    }

    fn grow(&mut self, bytes: usize) -> Result<usize, HeapError> {
        let old = self.bytes.len();
        let new_len = old
            .checked_add(bytes)
            .filter(|&len| len <= self.capacity)
            .ok_or(HeapError::Exhausted { requested: bytes })?;
        self.bytes.resize(new_len, 0);
        self.grow_calls += 1;
        Ok(old)
    }

    fn read_word(&self, offset: usize) -> usize {
        let mut word = [0u8; WORD];
        word.copy_from_slice(&self.bytes[offset..offset + WORD]);
        usize::from_ne_bytes(word)
    }

    fn write_word(&mut self, offset: usize, value: usize) {
        self.bytes[offset..offset + WORD].copy_from_slice(&value.to_ne_bytes());
    }

    fn copy_within(&mut self, src: usize, dst: usize, len: usize) {
        self.bytes.copy_within(src..src + len, dst);
    }

    fn fill(&mut self, offset: usize, len: usize, byte: u8) {
        self.bytes[offset..offset + len].fill(byte);
    }
}
