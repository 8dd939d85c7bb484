//! Allocator lifecycle log.
//!
//! Records are `Copy` and live in a fixed ring inside the heap, so recording
//! an event on the allocation path never allocates.

use core::fmt;

/// Number of records the ring retains before overwriting the oldest.
pub const LOG_CAPACITY: usize = 256;

/// Allocator lifecycle log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AllocatorLogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl AllocatorLogLevel {
    /// Parses a level name, ignoring ASCII case. Unknown names yield `None`.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Option<Self> {
        const NAMES: [(&str, AllocatorLogLevel); 6] = [
            ("trace", AllocatorLogLevel::Trace),
            ("debug", AllocatorLogLevel::Debug),
            ("info", AllocatorLogLevel::Info),
            ("warn", AllocatorLogLevel::Warn),
            ("warning", AllocatorLogLevel::Warn),
            ("error", AllocatorLogLevel::Error),
        ];
        let s = s.trim();
        NAMES
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(s))
            .map(|&(_, level)| level)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for AllocatorLogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured allocator lifecycle record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorLogRecord {
    /// Monotonic decision/event id.
    pub decision_id: u64,
    /// Severity level.
    pub level: AllocatorLogLevel,
    /// API symbol (`malloc`, `free`, `calloc`, `realloc`, ...).
    pub symbol: &'static str,
    /// Event kind (`alloc`, `free`, `heap_grow`, `double_free_detected`, ...).
    pub event: &'static str,
    /// Address involved in the event.
    pub ptr: Option<usize>,
    /// Size value involved in the event.
    pub size: Option<usize>,
    /// Machine-readable outcome label.
    pub outcome: &'static str,
    /// Snapshot: heap extent in bytes.
    pub heap_size: usize,
    /// Snapshot: currently active allocation count.
    pub active_count: usize,
}

impl AllocatorLogRecord {
    /// Correlation id for this record.
    #[must_use]
    pub fn trace_id(&self) -> String {
        format!("core::malloc::{}::{:016x}", self.symbol, self.decision_id)
    }
}

const EMPTY: AllocatorLogRecord = AllocatorLogRecord {
    decision_id: 0,
    level: AllocatorLogLevel::Trace,
    symbol: "",
    event: "",
    ptr: None,
    size: None,
    outcome: "",
    heap_size: 0,
    active_count: 0,
};

/// Fixed-capacity ring of lifecycle records.
pub(crate) struct LifecycleLog {
    records: [AllocatorLogRecord; LOG_CAPACITY],
    /// Index of the oldest retained record.
    start: usize,
    len: usize,
    next_decision_id: u64,
    min_level: AllocatorLogLevel,
    dropped: u64,
}

impl LifecycleLog {
    pub(crate) const fn new(min_level: AllocatorLogLevel) -> Self {
        Self {
            records: [EMPTY; LOG_CAPACITY],
            start: 0,
            len: 0,
            next_decision_id: 1,
            min_level,
            dropped: 0,
        }
    }

    pub(crate) fn set_min_level(&mut self, level: AllocatorLogLevel) {
        self.min_level = level;
    }

    /// Stores `record` if it passes the level filter, assigning its id.
    ///
    /// Ids advance even for filtered records so gaps show where events were
    /// suppressed.
    pub(crate) fn push(&mut self, mut record: AllocatorLogRecord) {
        let id = self.next_decision_id;
        self.next_decision_id = self.next_decision_id.wrapping_add(1);
        if record.level < self.min_level {
            return;
        }
        record.decision_id = id;
        if self.len == LOG_CAPACITY {
            self.records[self.start] = record;
            self.start = (self.start + 1) % LOG_CAPACITY;
            self.dropped += 1;
        } else {
            self.records[(self.start + self.len) % LOG_CAPACITY] = record;
            self.len += 1;
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Records overwritten because the ring was full.
    pub(crate) fn dropped(&self) -> u64 {
        self.dropped
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &AllocatorLogRecord> {
        (0..self.len).map(move |i| &self.records[(self.start + i) % LOG_CAPACITY])
    }

    pub(crate) fn drain(&mut self) -> Vec<AllocatorLogRecord> {
        let out = self.iter().copied().collect();
        self.start = 0;
        self.len = 0;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(level: AllocatorLogLevel, event: &'static str) -> AllocatorLogRecord {
        AllocatorLogRecord {
            level,
            symbol: "malloc",
            event,
            ..EMPTY
        }
    }

    #[test]
    fn test_level_parse_loose() {
        assert_eq!(
            AllocatorLogLevel::from_str_loose("WARN"),
            Some(AllocatorLogLevel::Warn)
        );
        assert_eq!(
            AllocatorLogLevel::from_str_loose(" warning "),
            Some(AllocatorLogLevel::Warn)
        );
        assert_eq!(
            AllocatorLogLevel::from_str_loose("Trace"),
            Some(AllocatorLogLevel::Trace)
        );
        assert_eq!(AllocatorLogLevel::from_str_loose("loud"), None);
        assert!(AllocatorLogLevel::Trace < AllocatorLogLevel::Error);
    }

    #[test]
    fn test_filter_keeps_ids_monotonic() {
        let mut log = LifecycleLog::new(AllocatorLogLevel::Info);
        log.push(record(AllocatorLogLevel::Trace, "alloc"));
        log.push(record(AllocatorLogLevel::Warn, "heap_exhausted"));
        log.push(record(AllocatorLogLevel::Debug, "free"));
        log.push(record(AllocatorLogLevel::Error, "invalid_block_state"));

        let kept: Vec<_> = log.iter().map(|r| (r.decision_id, r.event)).collect();
        assert_eq!(kept, vec![(2, "heap_exhausted"), (4, "invalid_block_state")]);
    }

    #[test]
    fn test_ring_overwrites_oldest() {
        let mut log = LifecycleLog::new(AllocatorLogLevel::Trace);
        for _ in 0..LOG_CAPACITY + 10 {
            log.push(record(AllocatorLogLevel::Trace, "alloc"));
        }
        assert_eq!(log.len(), LOG_CAPACITY);
        assert_eq!(log.dropped(), 10);

        let drained = log.drain();
        assert_eq!(drained.len(), LOG_CAPACITY);
        assert_eq!(drained[0].decision_id, 11);
        assert_eq!(drained[LOG_CAPACITY - 1].decision_id, (LOG_CAPACITY + 10) as u64);
        assert!(drained.windows(2).all(|w| w[0].decision_id < w[1].decision_id));
        assert_eq!(log.len(), 0);
    }

    #[test]
    fn test_trace_id_format() {
        let mut log = LifecycleLog::new(AllocatorLogLevel::Trace);
        log.push(record(AllocatorLogLevel::Trace, "alloc"));
        let rec = log.drain()[0];
        assert_eq!(rec.trace_id(), "core::malloc::malloc::0000000000000001");
    }
}
