//! Operation traces.
//!
//! A trace is a JSON document naming a sequence of allocator calls. Live
//! allocations are referred to by caller-chosen slot numbers so the same
//! trace replays identically regardless of the addresses the heap hands out.
//!
//! ```json
//! {
//!   "name": "reuse",
//!   "ops": [
//!     { "op": "alloc", "slot": 0, "size": 64 },
//!     { "op": "free", "slot": 0 },
//!     { "op": "check" }
//!   ]
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::HarnessError;

/// Heap capacity used when a trace does not name one.
pub const DEFAULT_CAPACITY: usize = 16 << 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum TraceOp {
    Alloc {
        slot: usize,
        size: usize,
    },
    Free {
        slot: usize,
    },
    Realloc {
        slot: usize,
        size: usize,
    },
    Calloc {
        slot: usize,
        count: usize,
        size: usize,
    },
    Memalign {
        slot: usize,
        align: usize,
        size: usize,
    },
    /// Explicit validator checkpoint.
    Check,
}

impl TraceOp {
    /// The allocator symbol this operation exercises.
    #[must_use]
    pub const fn symbol(&self) -> &'static str {
        match self {
            Self::Alloc { .. } => "malloc",
            Self::Free { .. } => "free",
            Self::Realloc { .. } => "realloc",
            Self::Calloc { .. } => "calloc",
            Self::Memalign { .. } => "memalign",
            Self::Check => "check_heap",
        }
    }

    #[must_use]
    pub const fn slot(&self) -> Option<usize> {
        match *self {
            Self::Alloc { slot, .. }
            | Self::Free { slot }
            | Self::Realloc { slot, .. }
            | Self::Calloc { slot, .. }
            | Self::Memalign { slot, .. } => Some(slot),
            Self::Check => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trace {
    pub name: String,
    /// Upper bound on the simulated heap region.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub growth_increment: Option<usize>,
    pub ops: Vec<TraceOp>,
}

impl Trace {
    #[must_use]
    pub fn new(name: impl Into<String>, ops: Vec<TraceOp>) -> Self {
        Self {
            name: name.into(),
            capacity: None,
            growth_increment: None,
            ops,
        }
    }

    /// Parse a trace from raw JSON bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, HarnessError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Load a trace from disk, returning it with the SHA-256 of the file.
    pub fn load(path: &Path) -> Result<(Self, String), HarnessError> {
        let bytes = std::fs::read(path).map_err(|source| HarnessError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let trace = Self::from_slice(&bytes)?;
        Ok((trace, sha256_hex(&bytes)))
    }

    /// SHA-256 of the canonical JSON encoding of this trace.
    pub fn digest(&self) -> Result<String, HarnessError> {
        let bytes = serde_json::to_vec(self)?;
        Ok(sha256_hex(&bytes))
    }

    #[must_use]
    pub fn capacity_or_default(&self) -> usize {
        self.capacity.unwrap_or(DEFAULT_CAPACITY)
    }
}

/// Lowercase hex SHA-256 digest.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        let _ = write!(out, "{b:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_ops() {
        let json = br#"{
            "name": "t",
            "capacity": 4096,
            "ops": [
                {"op": "alloc", "slot": 1, "size": 24},
                {"op": "calloc", "slot": 2, "count": 4, "size": 8},
                {"op": "memalign", "slot": 3, "align": 64, "size": 10},
                {"op": "realloc", "slot": 1, "size": 100},
                {"op": "free", "slot": 2},
                {"op": "check"}
            ]
        }"#;
        let trace = Trace::from_slice(json).unwrap();
        assert_eq!(trace.capacity, Some(4096));
        assert_eq!(trace.growth_increment, None);
        assert_eq!(trace.ops.len(), 6);
        assert_eq!(trace.ops[0], TraceOp::Alloc { slot: 1, size: 24 });
        assert_eq!(trace.ops[2].symbol(), "memalign");
        assert_eq!(trace.ops[5].slot(), None);
    }

    #[test]
    fn unknown_op_is_rejected() {
        let json = br#"{"name": "t", "ops": [{"op": "mmap", "slot": 0}]}"#;
        assert!(matches!(
            Trace::from_slice(json),
            Err(HarnessError::Trace(_))
        ));
    }

    #[test]
    fn sha256_matches_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn digest_is_stable_across_clones() {
        let trace = Trace::new("d", vec![TraceOp::Alloc { slot: 0, size: 8 }, TraceOp::Check]);
        assert_eq!(trace.digest().unwrap(), trace.clone().digest().unwrap());
        assert_eq!(trace.capacity_or_default(), DEFAULT_CAPACITY);
    }
}
