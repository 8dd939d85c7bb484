//! Deterministic churn workloads.
//!
//! A storm is a generated [`Trace`]: the same seed always yields the same
//! operations, so a failing storm can be written out and replayed as-is.

use crate::error::HarnessError;
use crate::trace::{Trace, TraceOp};

/// Alignments drawn for `memalign` operations.
const ALIGNMENTS: [usize; 6] = [16, 32, 64, 128, 256, 4096];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StormConfig {
    pub seed: u64,
    pub ops: usize,
    /// Heap capacity the generated trace declares.
    pub capacity: usize,
    /// Number of distinct slots the workload cycles through.
    pub slots: usize,
    /// Growth increment the generated trace declares.
    pub growth_increment: Option<usize>,
    /// Insert a validator checkpoint every this many operations (0 = never).
    pub check_every: usize,
}

impl Default for StormConfig {
    fn default() -> Self {
        Self {
            seed: 0x5EED,
            ops: 10_000,
            capacity: 16 << 20,
            slots: 64,
            growth_increment: None,
            check_every: 64,
        }
    }
}

struct XorShift64(u64);

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self(if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed })
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.0 = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn below(&mut self, bound: usize) -> usize {
        (self.next_u64() % bound as u64) as usize
    }

    /// Mostly small sizes with an occasional large one.
    fn size(&mut self) -> usize {
        match self.below(16) {
            0 => 1024 + self.below(7 * 1024),
            1..=3 => 257 + self.below(767),
            _ => 1 + self.below(256),
        }
    }
}

/// Generate the storm trace described by `config`.
pub fn generate(config: &StormConfig) -> Result<Trace, HarnessError> {
    if config.slots == 0 {
        return Err(HarnessError::Storm("slots must be non-zero"));
    }
    if config.capacity == 0 {
        return Err(HarnessError::Storm("capacity must be non-zero"));
    }
    let mut rng = XorShift64::new(config.seed);
    let mut live = vec![false; config.slots];
    let mut ops = Vec::with_capacity(config.ops + config.ops / config.check_every.max(1));

    for i in 0..config.ops {
        let slot = rng.below(config.slots);
        let roll = rng.below(10);
        let op = if live[slot] {
            match roll {
                0..=5 => {
                    live[slot] = false;
                    TraceOp::Free { slot }
                }
                6 => {
                    live[slot] = false;
                    TraceOp::Realloc { slot, size: 0 }
                }
                _ => TraceOp::Realloc {
                    slot,
                    size: rng.size(),
                },
            }
        } else {
            live[slot] = true;
            match roll {
                0..=5 => TraceOp::Alloc {
                    slot,
                    size: rng.size(),
                },
                6 | 7 => TraceOp::Calloc {
                    slot,
                    count: 1 + rng.below(16),
                    size: 1 + rng.below(64),
                },
                _ => TraceOp::Memalign {
                    slot,
                    align: ALIGNMENTS[rng.below(ALIGNMENTS.len())],
                    size: rng.size(),
                },
            }
        };
        ops.push(op);
        if config.check_every != 0 && (i + 1) % config.check_every == 0 {
            ops.push(TraceOp::Check);
        }
    }

    // Drain so the final walk sees a fully coalesced heap.
    for (slot, _) in live.iter().enumerate().filter(|(_, l)| **l) {
        ops.push(TraceOp::Free { slot });
    }
    ops.push(TraceOp::Check);

    let mut trace = Trace::new(format!("storm-{:016x}", config.seed), ops);
    trace.capacity = Some(config.capacity);
    trace.growth_increment = config.growth_increment;
    Ok(trace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_trace() {
        let config = StormConfig {
            ops: 500,
            ..StormConfig::default()
        };
        let a = generate(&config).unwrap();
        let b = generate(&config).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.digest().unwrap(), b.digest().unwrap());

        let c = generate(&StormConfig { seed: 7, ..config }).unwrap();
        assert_ne!(a.ops, c.ops);
    }

    #[test]
    fn ends_with_drain_and_check() {
        let trace = generate(&StormConfig {
            ops: 300,
            slots: 8,
            check_every: 0,
            ..StormConfig::default()
        })
        .unwrap();
        assert_eq!(trace.ops.last(), Some(&TraceOp::Check));
        assert_eq!(
            trace.ops.iter().filter(|op| **op == TraceOp::Check).count(),
            1
        );
        assert_eq!(trace.capacity, Some(16 << 20));
    }

    #[test]
    fn checkpoints_are_interleaved() {
        let trace = generate(&StormConfig {
            ops: 128,
            check_every: 32,
            ..StormConfig::default()
        })
        .unwrap();
        let checks = trace.ops.iter().filter(|op| **op == TraceOp::Check).count();
        assert_eq!(checks, 4 + 1);
    }

    #[test]
    fn rejects_degenerate_parameters() {
        let bad = StormConfig {
            slots: 0,
            ..StormConfig::default()
        };
        assert!(matches!(generate(&bad), Err(HarnessError::Storm(_))));
    }

    #[test]
    fn sizes_stay_in_range() {
        let mut rng = XorShift64::new(0);
        for _ in 0..10_000 {
            let size = rng.size();
            assert!((1..8192).contains(&size));
        }
    }
}
