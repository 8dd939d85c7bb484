//! Trace replay against an in-memory heap.

use std::collections::{BTreeMap, BTreeSet};

use brkmalloc_core::{
    ALIGN, AllocatorLogLevel, CheckMode, Heap, HeapCheck, HeapConfig, HeapStats, VecHeapSource,
};
use serde::{Deserialize, Serialize};

use crate::error::HarnessError;
use crate::structured_log::{LogEmitter, LogEntry, LogLevel, Outcome};
use crate::trace::{Trace, TraceOp};

/// What went wrong at a replay step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The validator rejected the heap.
    Violation,
    /// Payload bytes differ from what the slot last wrote.
    Corruption,
    Misaligned,
    /// Usable size smaller than the request.
    ShortBlock,
    UnknownSlot,
    SlotInUse,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayFailure {
    pub step: usize,
    pub symbol: String,
    pub kind: FailureKind,
    pub message: String,
}

impl ReplayFailure {
    fn new(step: usize, op: &TraceOp, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            step,
            symbol: op.symbol().to_string(),
            kind,
            message: message.into(),
        }
    }

    /// Replay cannot continue past a damaged heap.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            FailureKind::Violation | FailureKind::Corruption | FailureKind::ShortBlock
        )
    }
}

/// Serializable mirror of [`HeapStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSummary {
    pub heap_size: usize,
    pub mallocs: u64,
    pub reallocs: u64,
    pub callocs: u64,
    pub frees: u64,
    pub memaligns: u64,
    pub active_count: usize,
    pub total_allocated: usize,
}

impl From<HeapStats> for StatsSummary {
    fn from(stats: HeapStats) -> Self {
        Self {
            heap_size: stats.heap_size,
            mallocs: stats.allocate_calls,
            reallocs: stats.resize_calls,
            callocs: stats.zero_allocate_calls,
            frees: stats.release_calls,
            memaligns: stats.aligned_allocate_calls,
            active_count: stats.active_count,
            total_allocated: stats.total_allocated,
        }
    }
}

/// Serializable mirror of [`HeapCheck`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckSummary {
    pub blocks: usize,
    pub free_blocks: usize,
    pub allocated_blocks: usize,
    pub free_bytes: usize,
    pub allocated_bytes: usize,
    pub heap_size: usize,
}

impl From<HeapCheck> for CheckSummary {
    fn from(check: HeapCheck) -> Self {
        Self {
            blocks: check.blocks,
            free_blocks: check.free_blocks,
            allocated_blocks: check.allocated_blocks,
            free_bytes: check.free_bytes,
            allocated_bytes: check.allocated_bytes,
            heap_size: check.heap_size,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayReport {
    pub name: String,
    pub trace_sha256: String,
    /// Steps executed, including the one that failed fatally.
    pub steps: usize,
    pub total_ops: usize,
    /// Calls that returned null (zero sizes, bad alignments, exhaustion).
    pub null_results: usize,
    pub live_slots: usize,
    pub peak_live_bytes: usize,
    pub passed: bool,
    pub stats: StatsSummary,
    /// Final validator walk; absent when the heap is damaged.
    pub check: Option<CheckSummary>,
    pub failures: Vec<ReplayFailure>,
    pub dropped_log_records: u64,
    /// Statistics report exactly as printed at process exit.
    pub exit_report: String,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    addr: usize,
    len: usize,
    fill: u8,
}

/// Executes trace operations one at a time, tracking slot contents.
pub struct Replayer {
    heap: Heap<VecHeapSource>,
    slots: BTreeMap<usize, Slot>,
    /// Slots whose last allocation returned null.
    null_slots: BTreeSet<usize>,
    null_results: usize,
    live_bytes: usize,
    peak_live_bytes: usize,
}

impl Replayer {
    #[must_use]
    pub fn new(capacity: usize, growth_increment: Option<usize>) -> Self {
        let mut config = HeapConfig::DEFAULT
            .with_check_mode(CheckMode::Off)
            .with_log_level(AllocatorLogLevel::Trace)
            .with_report_at_exit(false);
        if let Some(bytes) = growth_increment {
            config = config.with_growth_increment(bytes);
        }
        Self {
            heap: Heap::with_config(VecHeapSource::with_capacity(capacity), config),
            slots: BTreeMap::new(),
            null_slots: BTreeSet::new(),
            null_results: 0,
            live_bytes: 0,
            peak_live_bytes: 0,
        }
    }

    #[must_use]
    pub fn for_trace(trace: &Trace) -> Self {
        Self::new(trace.capacity_or_default(), trace.growth_increment)
    }

    #[must_use]
    pub fn heap(&self) -> &Heap<VecHeapSource> {
        &self.heap
    }

    #[must_use]
    pub fn live_slots(&self) -> usize {
        self.slots.len()
    }

    /// Execute one operation, then walk the heap.
    pub fn step(&mut self, step: usize, op: &TraceOp) -> Result<(), ReplayFailure> {
        match *op {
            TraceOp::Alloc { slot, size } => {
                self.ensure_vacant(step, op, slot)?;
                let addr = self.heap.allocate(size);
                self.install(step, op, slot, addr, size)?;
            }
            TraceOp::Calloc { slot, count, size } => {
                self.ensure_vacant(step, op, slot)?;
                let addr = self.heap.zero_allocate(count, size);
                let len = count.saturating_mul(size);
                if let Some(addr) = addr {
                    self.expect_fill(step, op, addr, len, 0)?;
                }
                self.install(step, op, slot, addr, len)?;
            }
            TraceOp::Memalign { slot, align, size } => {
                self.ensure_vacant(step, op, slot)?;
                let addr = self.heap.allocate_aligned(align, size);
                if let Some(addr) = addr
                    && addr % align != 0
                {
                    return Err(ReplayFailure::new(
                        step,
                        op,
                        FailureKind::Misaligned,
                        format!("{addr:#x} is not {align}-aligned"),
                    ));
                }
                self.install(step, op, slot, addr, size)?;
            }
            TraceOp::Free { slot } => {
                let Some(old) = self.slots.remove(&slot) else {
                    if !self.null_slots.remove(&slot) {
                        return Err(unknown_slot(step, op, slot));
                    }
                    // free(NULL)
                    self.heap.release(0);
                    return self.validate(step, op);
                };
                self.expect_fill(step, op, old.addr, old.len, old.fill)?;
                self.live_bytes -= old.len;
                self.heap.release(old.addr);
            }
            TraceOp::Realloc { slot, size } => self.realloc(step, op, slot, size)?,
            TraceOp::Check => {}
        }
        self.validate(step, op)
    }

    fn realloc(
        &mut self,
        step: usize,
        op: &TraceOp,
        slot: usize,
        size: usize,
    ) -> Result<(), ReplayFailure> {
        let Some(old) = self.slots.remove(&slot) else {
            self.null_slots.remove(&slot);
            let addr = self.heap.resize(0, size);
            return self.install(step, op, slot, addr, size);
        };
        self.expect_fill(step, op, old.addr, old.len, old.fill)?;
        self.live_bytes -= old.len;
        match self.heap.resize(old.addr, size) {
            Some(addr) => {
                self.expect_fill(step, op, addr, old.len.min(size), old.fill)?;
                self.install(step, op, slot, Some(addr), size)
            }
            // Released.
            None if size == 0 => Ok(()),
            None => {
                // The old block survives a failed resize.
                self.null_results += 1;
                self.live_bytes += old.len;
                self.slots.insert(slot, old);
                Ok(())
            }
        }
    }

    fn ensure_vacant(&self, step: usize, op: &TraceOp, slot: usize) -> Result<(), ReplayFailure> {
        if self.slots.contains_key(&slot) {
            return Err(ReplayFailure::new(
                step,
                op,
                FailureKind::SlotInUse,
                format!("slot {slot} is still live"),
            ));
        }
        Ok(())
    }

    fn install(
        &mut self,
        step: usize,
        op: &TraceOp,
        slot: usize,
        addr: Option<usize>,
        len: usize,
    ) -> Result<(), ReplayFailure> {
        let Some(addr) = addr else {
            self.null_results += 1;
            self.null_slots.insert(slot);
            return Ok(());
        };
        self.null_slots.remove(&slot);
        if addr % ALIGN != 0 {
            return Err(ReplayFailure::new(
                step,
                op,
                FailureKind::Misaligned,
                format!("{addr:#x} is not {ALIGN}-aligned"),
            ));
        }
        let usable = self.heap.usable_size(addr).unwrap_or(0);
        if usable < len {
            return Err(ReplayFailure::new(
                step,
                op,
                FailureKind::ShortBlock,
                format!("{addr:#x} holds {usable} bytes, {len} requested"),
            ));
        }
        let fill = fill_byte(slot, step);
        let Some(bytes) = self.heap.source_mut().payload_mut(addr, len) else {
            return Err(out_of_region(step, op, addr, len));
        };
        bytes.fill(fill);
        self.slots.insert(slot, Slot { addr, len, fill });
        self.live_bytes += len;
        self.peak_live_bytes = self.peak_live_bytes.max(self.live_bytes);
        Ok(())
    }

    fn expect_fill(
        &self,
        step: usize,
        op: &TraceOp,
        addr: usize,
        len: usize,
        fill: u8,
    ) -> Result<(), ReplayFailure> {
        let Some(bytes) = self.heap.source().payload(addr, len) else {
            return Err(out_of_region(step, op, addr, len));
        };
        match bytes.iter().position(|&b| b != fill) {
            None => Ok(()),
            Some(at) => Err(ReplayFailure::new(
                step,
                op,
                FailureKind::Corruption,
                format!(
                    "byte {at} of {addr:#x} is {:#04x}, expected {fill:#04x}",
                    bytes[at]
                ),
            )),
        }
    }

    fn validate(&self, step: usize, op: &TraceOp) -> Result<(), ReplayFailure> {
        self.heap.check_heap().map(|_| ()).map_err(|violation| {
            ReplayFailure::new(step, op, FailureKind::Violation, violation.to_string())
        })
    }

    /// Final accounting for a finished (or aborted) run.
    #[must_use]
    pub fn finish(
        &self,
        name: &str,
        trace_sha256: &str,
        steps: usize,
        total_ops: usize,
        failures: Vec<ReplayFailure>,
    ) -> ReplayReport {
        let stats = self.heap.stats();
        let check = self.heap.check_heap().ok().map(CheckSummary::from);
        ReplayReport {
            name: name.to_string(),
            trace_sha256: trace_sha256.to_string(),
            steps,
            total_ops,
            null_results: self.null_results,
            live_slots: self.slots.len(),
            peak_live_bytes: self.peak_live_bytes,
            passed: failures.is_empty() && check.is_some(),
            stats: stats.into(),
            check,
            failures,
            dropped_log_records: self.heap.dropped_log_records(),
            exit_report: stats.to_string(),
        }
    }
}

/// Replay a whole trace, streaming allocator records to `log` when given.
pub fn replay(
    trace: &Trace,
    trace_sha256: &str,
    mut log: Option<&mut LogEmitter>,
) -> Result<ReplayReport, HarnessError> {
    let mut replayer = Replayer::for_trace(trace);
    let mut failures = Vec::new();
    let mut steps = 0;

    if let Some(log) = log.as_deref_mut() {
        log.emit_entry(
            LogEntry::new("", LogLevel::Info, "replay_start").with_details(serde_json::json!({
                "name": trace.name,
                "ops": trace.ops.len(),
                "trace_sha256": trace_sha256,
            })),
        )?;
    }

    for (step, op) in trace.ops.iter().enumerate() {
        steps = step + 1;
        let result = replayer.step(step, op);
        let records = replayer.heap.drain_lifecycle_logs();
        if let Some(log) = log.as_deref_mut() {
            for record in &records {
                log.emit_entry(LogEntry::from_allocator(record).with_step(step))?;
            }
        }
        let Err(failure) = result else { continue };
        if let Some(log) = log.as_deref_mut() {
            log.emit_entry(
                LogEntry::new("", LogLevel::Error, "replay_failure")
                    .with_symbol(&failure.symbol)
                    .with_step(step)
                    .with_outcome(Outcome::Fail)
                    .with_details(serde_json::json!({
                        "kind": failure.kind,
                        "message": failure.message,
                    })),
            )?;
        }
        let fatal = failure.is_fatal();
        failures.push(failure);
        if fatal {
            break;
        }
    }

    let report = replayer.finish(&trace.name, trace_sha256, steps, trace.ops.len(), failures);
    if let Some(log) = log {
        let stats = replayer.heap.stats();
        log.emit_entry(
            LogEntry::new("", LogLevel::Info, "replay_end")
                .with_heap_snapshot(stats.heap_size, stats.active_count)
                .with_outcome(if report.passed {
                    Outcome::Pass
                } else {
                    Outcome::Fail
                }),
        )?;
        log.flush()?;
    }
    Ok(report)
}

/// Non-zero pattern byte for a slot written at `step`.
fn fill_byte(slot: usize, step: usize) -> u8 {
    (slot.wrapping_mul(131).wrapping_add(step.wrapping_mul(7)) % 251) as u8 + 1
}

fn unknown_slot(step: usize, op: &TraceOp, slot: usize) -> ReplayFailure {
    ReplayFailure::new(
        step,
        op,
        FailureKind::UnknownSlot,
        format!("slot {slot} is not live"),
    )
}

fn out_of_region(step: usize, op: &TraceOp, addr: usize, len: usize) -> ReplayFailure {
    ReplayFailure::new(
        step,
        op,
        FailureKind::Corruption,
        format!("{len} bytes at {addr:#x} leave the heap region"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(ops: Vec<TraceOp>) -> ReplayReport {
        let trace = Trace::new("unit", ops);
        replay(&trace, "", None).unwrap()
    }

    #[test]
    fn clean_trace_passes() {
        let report = run(vec![
            TraceOp::Alloc { slot: 0, size: 64 },
            TraceOp::Alloc { slot: 1, size: 128 },
            TraceOp::Alloc { slot: 2, size: 32 },
            TraceOp::Free { slot: 1 },
            TraceOp::Realloc { slot: 0, size: 200 },
            TraceOp::Calloc {
                slot: 3,
                count: 4,
                size: 10,
            },
            TraceOp::Check,
        ]);
        assert!(report.passed, "{:?}", report.failures);
        assert_eq!(report.steps, 7);
        assert_eq!(report.live_slots, 3);
        assert_eq!(report.stats.mallocs, 3);
        assert_eq!(report.stats.reallocs, 1);
        assert_eq!(report.stats.callocs, 1);
        assert_eq!(report.stats.frees, 1);
        assert_eq!(report.stats.total_allocated, 32 + 200 + 40);
        let check = report.check.unwrap();
        assert_eq!(check.allocated_blocks, 3);
        assert!(report.exit_report.contains("# mallocs:\t3"));
    }

    #[test]
    fn zero_size_requests_count_as_null() {
        let report = run(vec![
            TraceOp::Alloc { slot: 0, size: 0 },
            TraceOp::Memalign {
                slot: 1,
                align: 24,
                size: 8,
            },
        ]);
        assert!(report.passed);
        assert_eq!(report.null_results, 2);
        assert_eq!(report.live_slots, 0);
    }

    #[test]
    fn realloc_to_zero_frees_slot() {
        let report = run(vec![
            TraceOp::Alloc { slot: 5, size: 48 },
            TraceOp::Realloc { slot: 5, size: 0 },
            TraceOp::Alloc { slot: 5, size: 16 },
        ]);
        assert!(report.passed, "{:?}", report.failures);
        assert_eq!(report.live_slots, 1);
        assert_eq!(report.stats.active_count, 1);
    }

    #[test]
    fn freeing_a_null_slot_is_free_of_null() {
        let report = run(vec![
            TraceOp::Alloc { slot: 2, size: 0 },
            TraceOp::Free { slot: 2 },
            TraceOp::Free { slot: 2 },
        ]);
        assert_eq!(report.stats.frees, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].kind, FailureKind::UnknownSlot);
        assert_eq!(report.failures[0].step, 2);
    }

    #[test]
    fn realloc_of_empty_slot_allocates() {
        let report = run(vec![TraceOp::Realloc { slot: 9, size: 24 }]);
        assert!(report.passed);
        assert_eq!(report.live_slots, 1);
        assert_eq!(report.stats.reallocs, 1);
    }

    #[test]
    fn slot_misuse_is_reported_without_stopping() {
        let report = run(vec![
            TraceOp::Free { slot: 3 },
            TraceOp::Alloc { slot: 1, size: 8 },
            TraceOp::Alloc { slot: 1, size: 8 },
            TraceOp::Check,
        ]);
        assert!(!report.passed);
        assert_eq!(report.steps, 4);
        let kinds: Vec<_> = report.failures.iter().map(|f| f.kind).collect();
        assert_eq!(kinds, vec![FailureKind::UnknownSlot, FailureKind::SlotInUse]);
        assert_eq!(report.failures[0].symbol, "free");
        assert!(report.check.is_some());
    }

    #[test]
    fn memalign_addresses_honor_alignment() {
        let mut ops = Vec::new();
        for (slot, align) in [16usize, 32, 64, 128, 256, 4096].into_iter().enumerate() {
            ops.push(TraceOp::Alloc {
                slot: 100 + slot,
                size: 8 + slot,
            });
            ops.push(TraceOp::Memalign {
                slot,
                align,
                size: 40,
            });
        }
        let report = run(ops);
        assert!(report.passed, "{:?}", report.failures);
        assert_eq!(report.stats.memaligns, 6);
    }

    #[test]
    fn exhaustion_keeps_old_block_on_failed_realloc() {
        let mut trace = Trace::new(
            "tight",
            vec![
                TraceOp::Alloc { slot: 0, size: 100 },
                TraceOp::Realloc {
                    slot: 0,
                    size: 1 << 20,
                },
                TraceOp::Free { slot: 0 },
            ],
        );
        trace.capacity = Some(4096);
        trace.growth_increment = Some(1024);
        let report = replay(&trace, "", None).unwrap();
        assert!(report.passed, "{:?}", report.failures);
        assert_eq!(report.null_results, 1);
        assert_eq!(report.stats.active_count, 0);
    }

    #[test]
    fn allocator_records_reach_the_log() {
        use std::sync::{Arc, Mutex};

        #[derive(Clone, Default)]
        struct Sink(Arc<Mutex<Vec<u8>>>);
        impl std::io::Write for Sink {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let sink = Sink::default();
        let mut log = LogEmitter::to_writer(Box::new(sink.clone()), "unit");
        let trace = Trace::new(
            "log",
            vec![TraceOp::Alloc { slot: 0, size: 8 }, TraceOp::Free { slot: 0 }],
        );
        let report = replay(&trace, "abc", Some(&mut log)).unwrap();
        assert!(report.passed);

        let text = String::from_utf8(sink.0.lock().unwrap().clone()).unwrap();
        let entries: Vec<LogEntry> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(entries.first().unwrap().event, "replay_start");
        assert_eq!(entries.last().unwrap().event, "replay_end");
        assert_eq!(entries.last().unwrap().outcome, Some(Outcome::Pass));
        assert!(entries.iter().any(|e| e.event == "heap_grow"));
        let free = entries
            .iter()
            .find(|e| e.symbol.as_deref() == Some("free") && e.event == "free")
            .unwrap();
        assert_eq!(free.step, Some(1));
        assert!(free.trace_id.starts_with("core::malloc::free::"));
    }

    #[test]
    fn fill_bytes_are_never_zero() {
        for slot in 0..300 {
            for step in 0..50 {
                assert_ne!(fill_byte(slot, step), 0);
            }
        }
    }
}
