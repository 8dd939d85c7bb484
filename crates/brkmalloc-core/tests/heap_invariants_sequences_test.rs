use brkmalloc_core::{CheckMode, Heap, HeapConfig, HeapSource, VecHeapSource};

#[derive(Clone, Copy, Debug)]
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn gen_range_usize(&mut self, low: usize, high_inclusive: usize) -> usize {
        assert!(low <= high_inclusive);
        let span = high_inclusive - low + 1;
        low + (self.next_u64() as usize % span)
    }
}

#[derive(Clone, Copy, Debug)]
struct Live {
    addr: usize,
    size: usize,
    fill: u8,
}

fn new_heap(capacity: usize) -> Heap<VecHeapSource> {
    Heap::with_config(
        VecHeapSource::with_capacity(capacity),
        HeapConfig::DEFAULT
            .with_growth_increment(8192)
            .with_check_mode(CheckMode::Off),
    )
}

fn assert_no_overlap(heap: &Heap<VecHeapSource>, live: &[Option<Live>], ctx: &str) {
    let mut spans: Vec<(usize, usize)> = live
        .iter()
        .flatten()
        .map(|l| (l.addr, l.addr + heap.usable_size(l.addr).unwrap()))
        .collect();
    spans.sort_unstable();
    for pair in spans.windows(2) {
        assert!(pair[0].1 <= pair[1].0, "{ctx}: overlapping payloads {pair:?}");
    }
}

fn assert_contents(heap: &Heap<VecHeapSource>, live: &[Option<Live>], ctx: &str) {
    for l in live.iter().flatten() {
        let bytes = heap.source().payload(l.addr, l.size).unwrap();
        assert!(
            bytes.iter().all(|&b| b == l.fill),
            "{ctx}: payload at {:#x} lost its contents",
            l.addr
        );
    }
}

#[test]
fn deterministic_heap_sequences_hold_core_invariants() {
    const SEEDS: [u64; 4] = [1, 2, 3, 0x9E37_79B9];
    const STEPS: usize = 1_500;
    const SLOTS: usize = 48;

    for seed in SEEDS {
        let mut heap = new_heap(8 << 20);
        let mut rng = XorShift64::new(seed);
        let mut live: Vec<Option<Live>> = vec![None; SLOTS];

        for step in 0..STEPS {
            let ctx = format!("seed={seed} step={step}");
            let op = rng.gen_range_usize(0, 99);
            let idx = rng.gen_range_usize(0, SLOTS - 1);
            let fill = (step % 251) as u8 + 1;

            match (op, live[idx]) {
                (0..=44, None) => {
                    let size = rng.gen_range_usize(1, 2048);
                    let addr = heap.allocate(size).unwrap();
                    heap.source_mut().payload_mut(addr, size).unwrap().fill(fill);
                    live[idx] = Some(Live { addr, size, fill });
                }
                (45..=59, None) => {
                    let count = rng.gen_range_usize(1, 64);
                    let elem = rng.gen_range_usize(1, 32);
                    let addr = heap.zero_allocate(count, elem).unwrap();
                    let size = count * elem;
                    let bytes = heap.source().payload(addr, size).unwrap();
                    assert!(bytes.iter().all(|&b| b == 0), "{ctx}: calloc not zeroed");
                    heap.source_mut().payload_mut(addr, size).unwrap().fill(fill);
                    live[idx] = Some(Live { addr, size, fill });
                }
                (60..=79, Some(old)) => {
                    let size = rng.gen_range_usize(1, 4096);
                    let addr = heap.resize(old.addr, size).unwrap();
                    let kept = old.size.min(size);
                    let bytes = heap.source().payload(addr, kept).unwrap();
                    assert!(
                        bytes.iter().all(|&b| b == old.fill),
                        "{ctx}: resize lost contents"
                    );
                    heap.source_mut().payload_mut(addr, size).unwrap().fill(fill);
                    live[idx] = Some(Live { addr, size, fill });
                }
                (_, Some(old)) => {
                    heap.release(old.addr);
                    assert_eq!(heap.object_size(old.addr), None, "{ctx}: still live");
                    live[idx] = None;
                }
                (_, None) => heap.release(0),
            }

            let check = heap
                .check_heap()
                .unwrap_or_else(|v| panic!("{ctx}: {v}"));
            let live_count = live.iter().flatten().count();
            assert_eq!(check.allocated_blocks, live_count, "{ctx}");
            assert_eq!(
                check.allocated_bytes,
                live.iter().flatten().map(|l| l.size).sum::<usize>(),
                "{ctx}"
            );
            assert_eq!(check.heap_size, heap.source().extent(), "{ctx}");
            if step % 50 == 0 {
                assert_no_overlap(&heap, &live, &ctx);
                assert_contents(&heap, &live, &ctx);
            }
        }

        for slot in live.iter_mut() {
            if let Some(l) = slot.take() {
                heap.release(l.addr);
            }
        }
        let check = heap.check_heap().unwrap();
        assert_eq!(check.blocks, 1, "seed={seed}: full release must coalesce to one block");
        assert_eq!(check.free_bytes, heap.source().extent());
    }
}

#[test]
fn reuse_scenario_64_128_32() {
    let mut heap = new_heap(1 << 20);
    let a = heap.allocate(64).unwrap();
    heap.check_heap().unwrap();
    let b = heap.allocate(128).unwrap();
    heap.check_heap().unwrap();
    let c = heap.allocate(32).unwrap();
    heap.check_heap().unwrap();

    heap.release(b);
    let check = heap.check_heap().unwrap();
    assert_eq!(check.allocated_blocks, 2);

    let d = heap.allocate(100).unwrap();
    heap.check_heap().unwrap();
    assert_eq!(d, b);
    assert_eq!(heap.object_size(a), Some(64));
    assert_eq!(heap.object_size(c), Some(32));
    assert_eq!(heap.object_size(d), Some(100));
}

#[test]
fn release_then_allocate_same_size_round_trips() {
    let mut heap = new_heap(1 << 20);
    for size in [1, 24, 100, 500, 4000] {
        let _left = heap.allocate(16).unwrap();
        let p = heap.allocate(size).unwrap();
        let _right = heap.allocate(16).unwrap();
        heap.release(p);
        let q = heap.allocate(size).unwrap();
        assert_eq!(p, q, "size {size}");
        heap.check_heap().unwrap();
    }
}

#[test]
fn coalescing_leaves_no_adjacent_free_blocks() {
    let mut heap = new_heap(1 << 20);
    let addrs: Vec<usize> = (0..64).map(|i| heap.allocate(16 + i * 8).unwrap()).collect();
    let mut rng = XorShift64::new(7);
    let mut order: Vec<usize> = (0..addrs.len()).collect();
    for i in (1..order.len()).rev() {
        let j = rng.gen_range_usize(0, i);
        order.swap(i, j);
    }
    for (n, &i) in order.iter().enumerate() {
        heap.release(addrs[i]);
        let check = heap.check_heap().unwrap();
        assert_eq!(check.allocated_blocks, addrs.len() - n - 1);
    }
    assert_eq!(heap.check_heap().unwrap().blocks, 1);
}
