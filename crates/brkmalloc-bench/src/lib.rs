//! Shared fixtures for the brkmalloc benchmarks.

use brkmalloc_core::{CheckMode, Heap, HeapConfig, VecHeapSource};

/// Region capacity large enough for every bench workload.
pub const BENCH_CAPACITY: usize = 64 << 20;

/// A heap with per-operation checking disabled, as in release builds.
#[must_use]
pub fn bench_heap() -> Heap<VecHeapSource> {
    let config = HeapConfig::DEFAULT
        .with_check_mode(CheckMode::Off)
        .with_report_at_exit(false);
    Heap::with_config(VecHeapSource::with_capacity(BENCH_CAPACITY), config)
}

/// Deterministic size sequence: mostly small with a periodic large request.
#[must_use]
pub fn mixed_sizes(count: usize) -> Vec<usize> {
    let mut state = 0x9E37_79B9_7F4A_7C15u64;
    (0..count)
        .map(|_| {
            state ^= state >> 12;
            state ^= state << 25;
            state ^= state >> 27;
            let r = state.wrapping_mul(0x2545_F491_4F6C_DD1D);
            if r % 32 == 0 {
                2048 + (r >> 8) as usize % 6144
            } else {
                8 + (r >> 8) as usize % 248
            }
        })
        .collect()
}
