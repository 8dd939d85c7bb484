//! Heap usage counters.

use core::fmt;

/// Snapshot of the allocator counters.
///
/// Call counters only ever increase. `active_count` and `total_allocated`
/// track live allocations (requested bytes, not block sizes).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Heap extent in bytes.
    pub heap_size: usize,
    pub allocate_calls: u64,
    pub release_calls: u64,
    pub resize_calls: u64,
    pub zero_allocate_calls: u64,
    pub aligned_allocate_calls: u64,
    pub active_count: usize,
    pub total_allocated: usize,
}

impl HeapStats {
    pub(crate) const ZERO: Self = Self {
        heap_size: 0,
        allocate_calls: 0,
        release_calls: 0,
        resize_calls: 0,
        zero_allocate_calls: 0,
        aligned_allocate_calls: 0,
        active_count: 0,
        total_allocated: 0,
    };
}

/// The end-of-process report.
impl fmt::Display for HeapStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f)?;
        writeln!(f, "-------------------")?;
        writeln!(f, "HeapSize:\t{} bytes", self.heap_size)?;
        writeln!(f, "# mallocs:\t{}", self.allocate_calls)?;
        writeln!(f, "# reallocs:\t{}", self.resize_calls)?;
        writeln!(f, "# callocs:\t{}", self.zero_allocate_calls)?;
        writeln!(f, "# frees:\t{}", self.release_calls)?;
        writeln!(f)?;
        writeln!(f, "-------------------")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_layout() {
        let stats = HeapStats {
            heap_size: 65536,
            allocate_calls: 3,
            release_calls: 2,
            resize_calls: 1,
            zero_allocate_calls: 4,
            ..HeapStats::ZERO
        };
        let report = stats.to_string();
        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(lines[1], "-------------------");
        assert_eq!(lines[0], "");
        assert_eq!(lines[2], "HeapSize:\t65536 bytes");
        assert_eq!(lines[3], "# mallocs:\t3");
        assert_eq!(lines[4], "# reallocs:\t1");
        assert_eq!(lines[5], "# callocs:\t4");
        assert_eq!(lines[6], "# frees:\t2");
        assert_eq!(lines[7], "");
        assert_eq!(lines.last().copied(), Some("-------------------"));
    }
}
