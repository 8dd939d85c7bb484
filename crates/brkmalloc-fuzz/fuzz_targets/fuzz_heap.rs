#![no_main]
use brkmalloc_core::{CheckMode, Heap, HeapConfig, VecHeapSource};
use libfuzzer_sys::fuzz_target;

const CAPACITY: usize = 1 << 20;

fuzz_target!(|data: &[u8]| {
    // Each 4-byte chunk is one operation: opcode, slot, 16-bit size.
    if data.len() < 4 {
        return;
    }

    let config = HeapConfig::DEFAULT
        .with_check_mode(CheckMode::Off)
        .with_growth_increment(4096)
        .with_report_at_exit(false);
    let mut heap = Heap::with_config(VecHeapSource::with_capacity(CAPACITY), config);
    let mut slots: [Option<(usize, usize, u8)>; 16] = [None; 16];

    for chunk in data.chunks_exact(4) {
        let op = chunk[0] % 6;
        let slot = usize::from(chunk[1]) % slots.len();
        let size = usize::from(u16::from_le_bytes([chunk[2], chunk[3]]));
        let tag = chunk[1] | 1;

        match op {
            0 | 1 | 2 => {
                if slots[slot].is_some() {
                    continue;
                }
                let addr = match op {
                    0 => heap.allocate(size),
                    1 => heap.zero_allocate(size & 0xff, size >> 8),
                    _ => heap.allocate_aligned(1 << (chunk[2] % 13), size >> 4),
                };
                if let Some(addr) = addr {
                    let len = heap.object_size(addr).expect("live block has a size");
                    let bytes = heap.source_mut().payload_mut(addr, len).expect("in region");
                    bytes.fill(tag);
                    slots[slot] = Some((addr, len, tag));
                }
            }
            3 => {
                if let Some((addr, len, tag)) = slots[slot].take() {
                    let bytes = heap.source().payload(addr, len).expect("in region");
                    assert!(bytes.iter().all(|&b| b == tag), "payload clobbered");
                    heap.release(addr);
                }
            }
            4 => {
                let Some((addr, len, old_tag)) = slots[slot].take() else {
                    continue;
                };
                match heap.resize(addr, size) {
                    Some(fresh) => {
                        let keep = len.min(size);
                        let bytes = heap.source_mut().payload_mut(fresh, size).expect("in region");
                        assert!(bytes[..keep].iter().all(|&b| b == old_tag), "resize lost data");
                        bytes.fill(tag);
                        slots[slot] = Some((fresh, size, tag));
                    }
                    None if size == 0 => {}
                    None => slots[slot] = Some((addr, len, old_tag)),
                }
            }
            _ => {
                // Foreign pointers: misaligned interiors and addresses past the region.
                let base = slots[slot].map_or(0x1_0000, |(addr, _, _)| addr);
                let probe = if size & 0x8000 == 0 {
                    base.wrapping_add((size % 64) | 1)
                } else {
                    0x1_0000 + CAPACITY + (size & 0x7fff)
                };
                heap.release(probe);
            }
        }

        if let Err(violation) = heap.check_heap() {
            panic!("{violation}");
        }
    }

    for (addr, _, _) in slots.iter().flatten() {
        heap.release(*addr);
    }
    let check = heap.check_heap().expect("heap intact after drain");
    assert!(check.allocated_blocks == 0);
});
