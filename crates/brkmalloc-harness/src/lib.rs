//! # brkmalloc-harness
//!
//! Drives the core heap from recorded or generated operation traces.
//!
//! Every step is followed by a full validator walk, payload contents are
//! tracked per slot, and the run ends in a JSON [`ReplayReport`]. Allocator
//! lifecycle records can be streamed as JSONL through a [`LogEmitter`].

#![forbid(unsafe_code)]

pub mod error;
pub mod replay;
pub mod storm;
pub mod structured_log;
pub mod trace;

pub use error::HarnessError;
pub use replay::{ReplayFailure, ReplayReport, Replayer};
pub use storm::StormConfig;
pub use structured_log::{LogEmitter, LogEntry, LogLevel, Outcome};
pub use trace::{Trace, TraceOp};
