//! `#[global_allocator]` support for slotmalloc.
//!
//! Allows Rust programs to use the process heap as their global allocator:
//!
//! ```rust,ignore
//! use slotmalloc::SlotMalloc;
//!
//! #[global_allocator]
//! static GLOBAL: SlotMalloc = SlotMalloc;
//! ```

use crate::init;
use crate::util::UNIT;
use core::alloc::{GlobalAlloc, Layout};
use core::ptr;

/// A zero-sized unit struct that implements [`GlobalAlloc`] by delegating to
/// the process heap.
pub struct SlotMalloc;

unsafe impl GlobalAlloc for SlotMalloc {
    #[inline]
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let size = layout.size();
        let align = layout.align();

        // Zero-size types: return a well-aligned dangling pointer.
        if size == 0 {
            return align as *mut u8;
        }

        let heap = init::heap();
        let result = if align <= UNIT {
            heap.allocate(size)
        } else {
            heap.allocate_aligned(align, size)
        };
        result.map_or(ptr::null_mut(), |p| p.as_ptr())
    }

    #[inline]
    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let size = layout.size();
        let align = layout.align();

        if size == 0 {
            return align as *mut u8;
        }

        let heap = init::heap();
        if align <= UNIT {
            heap.allocate_zeroed(1, size).map_or(ptr::null_mut(), |p| p.as_ptr())
        } else {
            let p = self.alloc(layout);
            if !p.is_null() {
                ptr::write_bytes(p, 0, size);
            }
            p
        }
    }

    #[inline]
    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if layout.size() == 0 {
            return;
        }
        init::heap().deallocate(ptr);
    }

    #[inline]
    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let old_size = layout.size();
        let align = layout.align();

        if old_size == 0 {
            return self.alloc(Layout::from_size_align_unchecked(new_size, align));
        }

        let heap = init::heap();
        if align <= UNIT {
            return heap
                .reallocate(ptr, new_size)
                .map_or(ptr::null_mut(), |p| p.as_ptr());
        }

        // Over-aligned: reallocate() only guarantees UNIT alignment.
        match heap.allocate_aligned(align, new_size) {
            Ok(new) => {
                ptr::copy_nonoverlapping(ptr, new.as_ptr(), old_size.min(new_size));
                heap.deallocate(ptr);
                new.as_ptr()
            }
            Err(_) => ptr::null_mut(),
        }
    }
}
