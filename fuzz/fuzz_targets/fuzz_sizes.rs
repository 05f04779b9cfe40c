#![no_main]

use libfuzzer_sys::fuzz_target;
use slotmalloc::{Config, Heap};

// Size boundaries: every request is written to its full extent, must come
// back 16-byte aligned with exactly the requested usable size, and a zeroed
// request of the same size must read as zero even right after the slot was
// dirtied.

static HEAP: Heap = Heap::new(Config::DEFAULT);

fuzz_target!(|data: &[u8]| {
    let heap = &HEAP;
    for chunk in data.chunks_exact(4) {
        let raw = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        // Cap at 1 MiB
        let size = raw as usize % (1024 * 1024);

        let p = heap.allocate(size).expect("allocation failed").as_ptr();
        assert_eq!(p as usize % 16, 0, "allocate({}) returned {:p}", size, p);
        unsafe {
            std::ptr::write_bytes(p, 0xBB, size);
            assert_eq!(heap.usable_size(p), size);
            heap.deallocate(p);
        }

        let q = heap.allocate_zeroed(1, size).expect("zeroed allocation failed").as_ptr();
        let bytes = unsafe { std::slice::from_raw_parts(q, size) };
        assert!(bytes.iter().all(|&b| b == 0), "allocate_zeroed({}) not zeroed", size);
        unsafe { heap.deallocate(q) };
    }
});
