//! Block header layout.
//!
//! Every block, free or allocated, starts with a four-word header. Free
//! blocks also keep their free-list links in the first two payload words,
//! which is why the minimum payload is two words.
//!
//! ```text
//!   offset   ┌──────────────────┐
//!     +0     │ size             │  total bytes, header included
//!     +W     │ prev_size        │  size of the physical predecessor (0 = first)
//!     +2W    │ requested        │  payload bytes asked for (0 while free)
//!     +3W    │ tag              │  BlockState magic
//!     +4W    ├──────────────────┤  <- payload handed to callers
//!            │ next_free        │  free blocks only
//!            │ prev_free        │  free blocks only
//!            │ ...              │
//!            └──────────────────┘
//! ```
//!
//! The physical neighbors of a block are derived from its offset: the
//! successor starts at `offset + size`, the predecessor at
//! `offset - prev_size`.

use super::source::HeapSource;

/// Machine word size in bytes.
pub const WORD: usize = core::mem::size_of::<usize>();

/// Alignment of every block offset, block size and payload address.
pub const ALIGN: usize = 2 * WORD;

/// Size of the header in front of every payload.
pub const HEADER_SIZE: usize = 4 * WORD;

/// Smallest payload a block may carry: room for the two free-list links.
pub const MIN_PAYLOAD: usize = 2 * WORD;

/// Smallest block the allocator will create.
pub const MIN_BLOCK: usize = HEADER_SIZE + MIN_PAYLOAD;

/// Encoded "no block" link value.
pub const NIL: usize = usize::MAX;

const SIZE_WORD: usize = 0;
const PREV_SIZE_WORD: usize = WORD;
const REQUESTED_WORD: usize = 2 * WORD;
const TAG_WORD: usize = 3 * WORD;
const NEXT_FREE_WORD: usize = HEADER_SIZE;
const PREV_FREE_WORD: usize = HEADER_SIZE + WORD;

/// Allocation state of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockState {
    Free,
    Allocated,
}

impl BlockState {
    /// Header tag of a free block.
    pub const FREE_TAG: usize = 0x5555_5555;
    /// Header tag of an allocated block.
    pub const ALLOCATED_TAG: usize = 0x7777_7777;

    #[must_use]
    pub const fn tag(self) -> usize {
        match self {
            Self::Free => Self::FREE_TAG,
            Self::Allocated => Self::ALLOCATED_TAG,
        }
    }

    /// Decodes a header tag; `None` for anything but the two valid magics.
    #[must_use]
    pub const fn from_tag(tag: usize) -> Option<Self> {
        match tag {
            Self::FREE_TAG => Some(Self::Free),
            Self::ALLOCATED_TAG => Some(Self::Allocated),
            _ => None,
        }
    }
}

/// Rounds `value` up to the next multiple of [`ALIGN`].
#[inline]
#[must_use]
pub const fn align_up(value: usize) -> Option<usize> {
    match value.checked_add(ALIGN - 1) {
        Some(v) => Some(v & !(ALIGN - 1)),
        None => None,
    }
}

/// Total block size needed to carry `payload` bytes.
#[inline]
#[must_use]
pub fn block_size_for(payload: usize) -> Option<usize> {
    let raw = payload.checked_add(HEADER_SIZE)?;
    Some(align_up(raw)?.max(MIN_BLOCK))
}

#[inline]
const fn decode_link(raw: usize) -> Option<BlockRef> {
    if raw == NIL {
        None
    } else {
        Some(BlockRef(raw))
    }
}

#[inline]
const fn encode_link(link: Option<BlockRef>) -> usize {
    match link {
        Some(block) => block.0,
        None => NIL,
    }
}

/// Handle to a block, identified by the heap offset of its header.
///
/// A `BlockRef` carries no borrow of the heap; every accessor goes through
/// the [`HeapSource`] that owns the bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockRef(usize);

impl BlockRef {
    #[inline]
    #[must_use]
    pub const fn at(offset: usize) -> Self {
        Self(offset)
    }

    #[inline]
    #[must_use]
    pub const fn offset(self) -> usize {
        self.0
    }

    /// Heap offset of the first payload byte.
    #[inline]
    #[must_use]
    pub const fn payload_offset(self) -> usize {
        self.0 + HEADER_SIZE
    }

    #[inline]
    pub fn size<S: HeapSource + ?Sized>(self, source: &S) -> usize {
        source.read_word(self.0 + SIZE_WORD)
    }

    #[inline]
    pub fn set_size<S: HeapSource + ?Sized>(self, source: &mut S, size: usize) {
        source.write_word(self.0 + SIZE_WORD, size);
    }

    /// Offset one past the last byte of this block.
    #[inline]
    pub fn end<S: HeapSource + ?Sized>(self, source: &S) -> usize {
        self.0 + self.size(source)
    }

    #[inline]
    pub fn prev_size<S: HeapSource + ?Sized>(self, source: &S) -> usize {
        source.read_word(self.0 + PREV_SIZE_WORD)
    }

    #[inline]
    pub fn set_prev_size<S: HeapSource + ?Sized>(self, source: &mut S, size: usize) {
        source.write_word(self.0 + PREV_SIZE_WORD, size);
    }

    #[inline]
    pub fn requested<S: HeapSource + ?Sized>(self, source: &S) -> usize {
        source.read_word(self.0 + REQUESTED_WORD)
    }

    #[inline]
    pub fn set_requested<S: HeapSource + ?Sized>(self, source: &mut S, requested: usize) {
        source.write_word(self.0 + REQUESTED_WORD, requested);
    }

    /// Raw state tag, valid or not.
    #[inline]
    pub fn tag<S: HeapSource + ?Sized>(self, source: &S) -> usize {
        source.read_word(self.0 + TAG_WORD)
    }

    #[inline]
    pub fn state<S: HeapSource + ?Sized>(self, source: &S) -> Option<BlockState> {
        BlockState::from_tag(self.tag(source))
    }

    #[inline]
    pub fn set_state<S: HeapSource + ?Sized>(self, source: &mut S, state: BlockState) {
        source.write_word(self.0 + TAG_WORD, state.tag());
    }

    #[inline]
    pub fn is_free<S: HeapSource + ?Sized>(self, source: &S) -> bool {
        self.state(source) == Some(BlockState::Free)
    }

    #[inline]
    pub fn next_free<S: HeapSource + ?Sized>(self, source: &S) -> Option<BlockRef> {
        decode_link(source.read_word(self.0 + NEXT_FREE_WORD))
    }

    #[inline]
    pub fn set_next_free<S: HeapSource + ?Sized>(self, source: &mut S, link: Option<BlockRef>) {
        source.write_word(self.0 + NEXT_FREE_WORD, encode_link(link));
    }

    #[inline]
    pub fn prev_free<S: HeapSource + ?Sized>(self, source: &S) -> Option<BlockRef> {
        decode_link(source.read_word(self.0 + PREV_FREE_WORD))
    }

    #[inline]
    pub fn set_prev_free<S: HeapSource + ?Sized>(self, source: &mut S, link: Option<BlockRef>) {
        source.write_word(self.0 + PREV_FREE_WORD, encode_link(link));
    }

    /// Formats a fresh header. Free-list links are left to the caller.
    pub fn write_header<S: HeapSource + ?Sized>(
        self,
        source: &mut S,
        size: usize,
        prev_size: usize,
        state: BlockState,
    ) {
        self.set_size(source, size);
        self.set_prev_size(source, prev_size);
        self.set_requested(source, 0);
        self.set_state(source, state);
    }
}
