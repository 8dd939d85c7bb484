//! Allocator error types.

use thiserror::Error;

/// Reasons a heap operation did not produce memory or did not act.
///
/// The facade never surfaces these to callers of the C surface: every
/// error becomes the failure sentinel plus one lifecycle record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HeapError {
    #[error("zero-byte request")]
    InvalidSize,
    #[error("request size overflows the address space")]
    SizeOverflow,
    #[error("alignment {0} is not a power of two")]
    InvalidAlignment(usize),
    #[error("heap source exhausted while growing by {requested} bytes")]
    Exhausted { requested: usize },
    #[error("heap source returned {found:#x}, expected contiguous growth at {expected:#x}")]
    Discontiguous { expected: usize, found: usize },
    #[error("pointer {0:#x} does not belong to the heap")]
    ForeignPointer(usize),
    #[error("pointer {0:#x} is already free")]
    DoubleFree(usize),
    #[error("block at {addr:#x} carries invalid state tag {tag:#x}")]
    InvalidState { addr: usize, tag: usize },
}

impl HeapError {
    /// Lifecycle event name recorded for this error.
    #[must_use]
    pub const fn event(&self) -> &'static str {
        match self {
            Self::InvalidSize => "zero_size_request",
            Self::SizeOverflow => "size_overflow",
            Self::InvalidAlignment(_) => "invalid_alignment",
            Self::Exhausted { .. } => "heap_exhausted",
            Self::Discontiguous { .. } => "heap_discontiguous",
            Self::ForeignPointer(_) => "foreign_pointer",
            Self::DoubleFree(_) => "double_free_detected",
            Self::InvalidState { .. } => "invalid_block_state",
        }
    }

    /// Machine-readable outcome label.
    #[must_use]
    pub const fn outcome(&self) -> &'static str {
        match self {
            Self::InvalidSize | Self::SizeOverflow | Self::InvalidAlignment(_) => "denied",
            Self::Exhausted { .. } | Self::Discontiguous { .. } => "oom",
            Self::ForeignPointer(_) | Self::DoubleFree(_) | Self::InvalidState { .. } => "ignored",
        }
    }

    #[must_use]
    pub const fn level(&self) -> super::log::AllocatorLogLevel {
        use super::log::AllocatorLogLevel;
        match self {
            Self::InvalidSize => AllocatorLogLevel::Debug,
            Self::SizeOverflow | Self::InvalidAlignment(_) => AllocatorLogLevel::Info,
            Self::Exhausted { .. } | Self::Discontiguous { .. } => AllocatorLogLevel::Warn,
            Self::ForeignPointer(_) | Self::DoubleFree(_) => AllocatorLogLevel::Warn,
            Self::InvalidState { .. } => AllocatorLogLevel::Error,
        }
    }
}
