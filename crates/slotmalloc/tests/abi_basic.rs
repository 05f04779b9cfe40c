//! C ABI behavior tests for slotmalloc.
//!
//! These call the `extern "C"` entry points directly, so they exercise the
//! process heap exactly as an LD_PRELOADed program would.

use slotmalloc::api::*;
use std::collections::HashSet;
use std::ffi::c_void;
use std::ptr;

fn errno() -> i32 {
    unsafe { *libc::__errno_location() }
}

// ---------------------------------------------------------------------------
// malloc(0) returns a unique, non-NULL, freeable pointer
// ---------------------------------------------------------------------------

#[test]
fn malloc_zero_returns_unique_pointers() {
    unsafe {
        let ptrs: Vec<*mut c_void> = (0..64).map(|_| malloc(0)).collect();
        assert!(ptrs.iter().all(|p| !p.is_null()), "malloc(0) must return non-NULL");
        let unique: HashSet<usize> = ptrs.iter().map(|p| *p as usize).collect();
        assert_eq!(unique.len(), ptrs.len(), "malloc(0) must return unique pointers");
        for p in ptrs {
            free(p);
        }
    }
}

#[test]
fn free_null_is_noop() {
    unsafe {
        free(ptr::null_mut());
    }
}

// ---------------------------------------------------------------------------
// realloc edge cases
// ---------------------------------------------------------------------------

#[test]
fn realloc_null_acts_as_malloc() {
    unsafe {
        let p = realloc(ptr::null_mut(), 100) as *mut u8;
        assert!(!p.is_null());
        ptr::write_bytes(p, 0x7E, 100);
        assert_eq!(malloc_usable_size(p as *mut c_void), 100);
        free(p as *mut c_void);
    }
}

#[test]
fn realloc_to_zero_returns_minimum_allocation() {
    unsafe {
        let p = malloc(300);
        let q = realloc(p, 0);
        assert!(!q.is_null(), "realloc(p, 0) must not return NULL");
        assert_eq!(malloc_usable_size(q), 0);
        free(q);
    }
}

#[test]
fn realloc_within_slot_keeps_pointer() {
    unsafe {
        let p = malloc(40) as *mut u8;
        for i in 0..40 {
            *p.add(i) = i as u8;
        }
        let q = realloc(p as *mut c_void, 44) as *mut u8;
        assert_eq!(p, q, "growing within the slot must not move");
        let r = realloc(q as *mut c_void, 33) as *mut u8;
        assert_eq!(q, r, "shrinking within the class must not move");
        assert_eq!(malloc_usable_size(r as *mut c_void), 33);
        for i in 0..33 {
            assert_eq!(*r.add(i), i as u8);
        }
        free(r as *mut c_void);
    }
}

#[test]
fn realloc_shrink_preserves_data() {
    unsafe {
        let p = malloc(4096) as *mut u8;
        for i in 0..4096 {
            *p.add(i) = (i % 251) as u8;
        }
        let q = realloc(p as *mut c_void, 100) as *mut u8;
        assert!(!q.is_null());
        for i in 0..100 {
            assert_eq!(*q.add(i), (i % 251) as u8, "byte {} lost on shrink", i);
        }
        free(q as *mut c_void);
    }
}

#[test]
fn realloc_across_the_mapping_threshold() {
    unsafe {
        let p = malloc(1000) as *mut u8;
        ptr::write_bytes(p, 0x3C, 1000);
        let big = realloc(p as *mut c_void, 300_000) as *mut u8;
        assert!(!big.is_null());
        assert!((0..1000).all(|i| *big.add(i) == 0x3C));
        *big.add(299_999) = 1;
        let bigger = realloc(big as *mut c_void, 900_000) as *mut u8;
        assert!(!bigger.is_null());
        assert!((0..1000).all(|i| *bigger.add(i) == 0x3C));
        assert_eq!(*bigger.add(299_999), 1);
        assert_eq!(malloc_usable_size(bigger as *mut c_void), 900_000);
        free(bigger as *mut c_void);
    }
}

// ---------------------------------------------------------------------------
// calloc
// ---------------------------------------------------------------------------

#[test]
fn calloc_overflow_returns_null() {
    unsafe {
        let p = calloc(usize::MAX, 2);
        assert!(p.is_null(), "calloc overflow must return NULL");
        assert_eq!(errno(), libc::ENOMEM);
    }
}

#[test]
fn calloc_returns_zeroed_memory_after_reuse() {
    unsafe {
        for &size in &[24usize, 200, 5000, 200_000] {
            let p = malloc(size) as *mut u8;
            ptr::write_bytes(p, 0xFF, size);
            free(p as *mut c_void);
            let q = calloc(1, size) as *mut u8;
            assert!(!q.is_null());
            let slice = std::slice::from_raw_parts(q, size);
            assert!(slice.iter().all(|&b| b == 0), "calloc({}) not zeroed", size);
            free(q as *mut c_void);
        }
    }
}

// ---------------------------------------------------------------------------
// Alignment and sizes
// ---------------------------------------------------------------------------

#[test]
fn malloc_returns_16_byte_aligned_pointers() {
    unsafe {
        for size in [1usize, 7, 16, 31, 100, 1000, 10_000, 140_000] {
            let p = malloc(size);
            assert_eq!(p as usize % 16, 0, "malloc({}) = {:p} is misaligned", size, p);
            free(p);
        }
    }
}

#[test]
fn usable_size_is_requested_size() {
    unsafe {
        for size in [0usize, 1, 12, 13, 28, 29, 500, 4000, 131_051, 131_052, 1 << 20] {
            let p = malloc(size);
            assert_eq!(malloc_usable_size(p), size);
            free(p);
        }
        assert_eq!(malloc_usable_size(ptr::null_mut()), 0);
    }
}

#[test]
fn malloc_huge_fails_with_enomem() {
    unsafe {
        assert!(malloc(usize::MAX / 2).is_null());
        assert_eq!(errno(), libc::ENOMEM);
    }
}

// ---------------------------------------------------------------------------
// Aligned allocation APIs
// ---------------------------------------------------------------------------

#[test]
fn posix_memalign_various_alignments() {
    unsafe {
        for shift in 3..=16 {
            let align = 1usize << shift;
            let mut out: *mut c_void = ptr::null_mut();
            assert_eq!(posix_memalign(&mut out, align, 100), 0);
            assert_eq!(out as usize % align, 0, "posix_memalign({}) misaligned", align);
            ptr::write_bytes(out as *mut u8, 0x11, 100);
            assert_eq!(malloc_usable_size(out), 100);
            free(out);
        }
    }
}

#[test]
fn posix_memalign_rejects_bad_alignment() {
    unsafe {
        let mut out: *mut c_void = ptr::null_mut();
        assert_eq!(posix_memalign(&mut out, 24, 64), libc::EINVAL);
        assert_eq!(posix_memalign(&mut out, 4, 64), libc::EINVAL);
        assert!(out.is_null());
    }
}

#[test]
fn aligned_alloc_rounds_small_alignments_up() {
    unsafe {
        let p = aligned_alloc(1, 10);
        assert!(!p.is_null());
        free(p);
        let p = memalign(2, 10);
        assert!(!p.is_null());
        free(p);
    }
}

#[test]
fn aligned_alloc_non_power_of_two_sets_einval() {
    unsafe {
        assert!(aligned_alloc(48, 96).is_null());
        assert_eq!(errno(), libc::EINVAL);
    }
}

#[test]
fn valloc_and_pvalloc_are_page_aligned() {
    unsafe {
        let page = libc::sysconf(libc::_SC_PAGESIZE) as usize;
        let p = valloc(10);
        assert_eq!(p as usize % page, 0);
        free(p);
        let p = pvalloc(10);
        assert_eq!(p as usize % page, 0);
        assert_eq!(malloc_usable_size(p), page);
        free(p);
    }
}

// ---------------------------------------------------------------------------
// Round trips
// ---------------------------------------------------------------------------

#[test]
fn allocation_round_trip() {
    unsafe {
        let p = malloc(64) as *mut u8;
        for i in 0..64 {
            *p.add(i) = i as u8;
        }
        let q = realloc(p as *mut c_void, 4096) as *mut u8;
        for i in 0..64 {
            assert_eq!(*q.add(i), i as u8);
        }
        free(q as *mut c_void);
    }
}

#[test]
fn rapid_malloc_free_single_thread() {
    unsafe {
        for i in 0..100_000usize {
            let size = 1 + (i * 7919) % 2048;
            let p = malloc(size) as *mut u8;
            assert!(!p.is_null());
            *p = 0xAA;
            *p.add(size - 1) = 0xBB;
            free(p as *mut c_void);
        }
    }
}

#[test]
fn dump_does_not_crash() {
    unsafe {
        let p = malloc(48);
        slotmalloc_dump();
        free(p);
    }
}
