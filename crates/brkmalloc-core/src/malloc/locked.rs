//! Concurrency guard.
//!
//! One `parking_lot` mutex serializes every heap operation, growth and
//! validator walk. The mutex is built with `const_mutex`, so a process-wide
//! heap can be a plain `static`.

use parking_lot::{Mutex, const_mutex};

use super::heap::Heap;
use super::log::AllocatorLogRecord;
use super::source::HeapSource;
use super::stats::HeapStats;
use super::validator::{HeapCheck, HeapViolation};
use crate::config::HeapConfig;

/// A [`Heap`] behind a mutex.
///
/// Violations found by automatic checks are handed to the configured
/// handler after the guard is released, so a handler may inspect the heap
/// (or abort) without deadlocking.
pub struct LockedHeap<S> {
    inner: Mutex<Heap<S>>,
}

impl<S: HeapSource> LockedHeap<S> {
    pub const fn new(source: S) -> Self {
        Self::with_config(source, HeapConfig::DEFAULT)
    }

    pub const fn with_config(source: S, config: HeapConfig) -> Self {
        Self {
            inner: const_mutex(Heap::with_config(source, config)),
        }
    }

    fn run<R>(&self, op: impl FnOnce(&mut Heap<S>) -> R) -> R {
        let (out, violation, handler) = {
            let mut heap = self.inner.lock();
            let out = op(&mut heap);
            (out, heap.take_violation(), heap.config().violation_handler)
        };
        if let Some(violation) = violation {
            handler(&violation);
        }
        out
    }

    pub fn configure(&self, config: HeapConfig) {
        self.inner.lock().configure(config);
    }

    #[must_use]
    pub fn config(&self) -> HeapConfig {
        *self.inner.lock().config()
    }

    pub fn allocate(&self, size: usize) -> Option<usize> {
        self.run(|heap| heap.allocate(size))
    }

    pub fn release(&self, addr: usize) {
        self.run(|heap| heap.release(addr));
    }

    pub fn resize(&self, addr: usize, new_size: usize) -> Option<usize> {
        self.run(|heap| heap.resize(addr, new_size))
    }

    pub fn zero_allocate(&self, count: usize, elem_size: usize) -> Option<usize> {
        self.run(|heap| heap.zero_allocate(count, elem_size))
    }

    pub fn allocate_aligned(&self, align: usize, size: usize) -> Option<usize> {
        self.run(|heap| heap.allocate_aligned(align, size))
    }

    pub fn object_size(&self, addr: usize) -> Option<usize> {
        self.inner.lock().object_size(addr)
    }

    pub fn usable_size(&self, addr: usize) -> Option<usize> {
        self.inner.lock().usable_size(addr)
    }

    #[must_use]
    pub fn stats(&self) -> HeapStats {
        self.inner.lock().stats()
    }

    pub fn check_heap(&self) -> Result<HeapCheck, HeapViolation> {
        self.inner.lock().check_heap()
    }

    /// Validates the heap and hands a failure to the violation handler.
    pub fn assert_heap(&self) {
        self.run(|heap| {
            if let Err(violation) = heap.check_heap() {
                heap.defer_violation(violation);
            }
        });
    }

    pub fn drain_lifecycle_logs(&self) -> Vec<AllocatorLogRecord> {
        self.inner.lock().drain_lifecycle_logs()
    }

    /// Runs `f` with exclusive access to the heap.
    pub fn with_heap<R>(&self, f: impl FnOnce(&mut Heap<S>) -> R) -> R {
        self.run(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CheckMode;
    use crate::malloc::source::VecHeapSource;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static HANDLED: AtomicUsize = AtomicUsize::new(0);

    fn count_violation(_: &HeapViolation) {
        HANDLED.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn test_basic_calls_go_through_lock() {
        let heap = LockedHeap::new(VecHeapSource::with_capacity(1 << 16));
        let a = heap.allocate(100).unwrap();
        assert_eq!(heap.object_size(a), Some(100));
        let b = heap.resize(a, 200).unwrap();
        let c = heap.zero_allocate(4, 8).unwrap();
        heap.release(b);
        heap.release(c);
        let stats = heap.stats();
        assert_eq!(stats.allocate_calls, 1);
        assert_eq!(stats.resize_calls, 1);
        assert_eq!(stats.zero_allocate_calls, 1);
        assert_eq!(stats.release_calls, 2);
        assert_eq!(stats.active_count, 0);
        heap.check_heap().unwrap();
    }

    #[test]
    fn test_violation_handler_runs_after_unlock() {
        let config = HeapConfig::DEFAULT
            .with_check_mode(CheckMode::EveryOperation)
            .with_violation_handler(count_violation);
        let heap = LockedHeap::with_config(VecHeapSource::with_capacity(1 << 16), config);
        let a = heap.allocate(32).unwrap();
        let before = HANDLED.load(Ordering::SeqCst);

        heap.with_heap(|inner| {
            let offset = a - inner.source().base_addr() - crate::HEADER_SIZE;
            crate::BlockRef::at(offset).set_requested(inner.source_mut(), 1 << 20);
        });
        assert_eq!(HANDLED.load(Ordering::SeqCst), before);

        heap.allocate(8).unwrap();
        assert_eq!(HANDLED.load(Ordering::SeqCst), before + 1);

        heap.assert_heap();
        assert_eq!(HANDLED.load(Ordering::SeqCst), before + 2);
    }

    #[test]
    #[should_panic(expected = "heap check failed")]
    fn test_default_handler_panics() {
        let heap = LockedHeap::with_config(
            VecHeapSource::with_capacity(1 << 16),
            HeapConfig::DEFAULT.with_check_mode(CheckMode::Off),
        );
        let a = heap.allocate(32).unwrap();
        heap.with_heap(|inner| {
            let offset = a - inner.source().base_addr() - crate::HEADER_SIZE;
            crate::BlockRef::at(offset).set_size(inner.source_mut(), 8);
        });
        heap.assert_heap();
    }

    #[test]
    fn test_configure_applies_to_later_growth() {
        let heap = LockedHeap::new(VecHeapSource::with_capacity(1 << 20));
        heap.configure(HeapConfig::DEFAULT.with_growth_increment(4096));
        heap.allocate(16).unwrap();
        assert_eq!(heap.stats().heap_size, 4096);
        assert_eq!(heap.config().growth_increment, 4096);
    }
}
