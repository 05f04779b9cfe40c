#![no_main]

use libfuzzer_sys::fuzz_target;
use slotmalloc::{Config, Heap};
use std::ptr::NonNull;

/// Interprets the input as a sequence of heap operations on a heap private
/// to the target.
///
/// Each operation is four bytes:
///   byte 0: opcode (0=allocate, 1=release, 2=resize, 3=zeroed, 4..=7=aligned)
///   byte 1-2: size (little-endian u16), scaled up for opcode bit 3
///   byte 3: tracked pointer index
///
/// Every live block carries a fill byte that is checked before it is
/// resized or released.
const MAX_SLOTS: usize = 64;

static HEAP: Heap = Heap::new(Config::DEFAULT);

#[derive(Clone, Copy)]
struct Live {
    p: NonNull<u8>,
    len: usize,
    fill: u8,
}

fn check(heap: &Heap, live: &Live) {
    let bytes = unsafe { std::slice::from_raw_parts(live.p.as_ptr(), live.len) };
    assert!(bytes.iter().all(|&b| b == live.fill), "block contents changed");
    assert_eq!(unsafe { heap.usable_size(live.p.as_ptr()) }, live.len);
}

fn fill(live: &Live) {
    unsafe { std::ptr::write_bytes(live.p.as_ptr(), live.fill, live.len) };
}

fuzz_target!(|data: &[u8]| {
    let heap = &HEAP;
    let mut slots: [Option<Live>; MAX_SLOTS] = [None; MAX_SLOTS];

    for (n, op) in data.chunks_exact(4).enumerate() {
        let opcode = op[0] & 0x07;
        let mut size = u16::from_le_bytes([op[1], op[2]]) as usize;
        if op[0] & 0x08 != 0 {
            // Reach mapped groups and direct mappings too.
            size *= 8;
        }
        let slot = op[3] as usize % MAX_SLOTS;
        let tag = n as u8;

        if let Some(live) = &slots[slot] {
            check(heap, live);
        }

        match opcode {
            0 => {
                if let Some(old) = slots[slot].take() {
                    unsafe { heap.deallocate(old.p.as_ptr()) };
                }
                let p = heap.allocate(size).expect("allocation failed");
                let live = Live { p, len: size, fill: tag };
                fill(&live);
                slots[slot] = Some(live);
            }
            1 => {
                if let Some(old) = slots[slot].take() {
                    unsafe { heap.deallocate(old.p.as_ptr()) };
                }
            }
            2 => {
                let old = slots[slot].take();
                let from = old.map_or(std::ptr::null_mut(), |l| l.p.as_ptr());
                let p = unsafe { heap.reallocate(from, size) }.expect("resize failed");
                let live = Live { p, len: size, fill: tag };
                if let Some(old) = old {
                    // The kept prefix still holds the old fill.
                    let kept = old.len.min(size);
                    let bytes = unsafe { std::slice::from_raw_parts(p.as_ptr(), kept) };
                    assert!(bytes.iter().all(|&b| b == old.fill), "resize lost contents");
                }
                fill(&live);
                slots[slot] = Some(live);
            }
            3 => {
                if let Some(old) = slots[slot].take() {
                    unsafe { heap.deallocate(old.p.as_ptr()) };
                }
                let nmemb = (size >> 8).max(1);
                let elem = (size & 0xFF).max(1);
                let p = heap.allocate_zeroed(nmemb, elem).expect("zeroed allocation failed");
                let live = Live { p, len: nmemb * elem, fill: 0 };
                check(heap, &live);
                slots[slot] = Some(live);
            }
            _ => {
                if let Some(old) = slots[slot].take() {
                    unsafe { heap.deallocate(old.p.as_ptr()) };
                }
                let align = 8usize << (op[1] % 14);
                let p = heap.allocate_aligned(align, size).expect("aligned allocation failed");
                assert_eq!(p.as_ptr() as usize % align, 0);
                let live = Live { p, len: size, fill: tag };
                fill(&live);
                slots[slot] = Some(live);
            }
        }
    }

    for live in slots.iter().flatten() {
        check(heap, live);
        unsafe { heap.deallocate(live.p.as_ptr()) };
    }
    // Only the sole group of a class may stay behind once all is released.
    let stats = heap.stats();
    assert!(stats.ring_len_by_class.iter().all(|&n| n <= 1));
});
