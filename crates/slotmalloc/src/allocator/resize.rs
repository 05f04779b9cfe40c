use super::alloc::MAX_REQUEST;
use super::{AllocError, Heap};
use crate::platform::PageSource;
use crate::slab::frame::{get_meta, get_nominal_size, reframe_aligned, set_size};
use crate::slab::meta::Group;
use crate::slab::size_class::{class_stride, coarse_sibling, size_to_class, NUM_SIZE_CLASSES};
use crate::util::{align_up, IB, MAP_UNIT, MAX_ALIGN, MMAP_THRESHOLD, UNIT};
use core::ptr::{self, NonNull};

impl<P: PageSource> Heap<P> {
    /// Resize an allocation, in place when its slot allows. On failure the
    /// original allocation is untouched.
    ///
    /// # Safety
    /// `p` must be null or a live allocation of this heap.
    pub unsafe fn reallocate(&self, p: *mut u8, n: usize) -> Result<NonNull<u8>, AllocError> {
        if p.is_null() {
            return self.allocate(n);
        }
        if n >= MAX_REQUEST {
            return Err(AllocError::OutOfMemory);
        }
        let slot = get_meta(p, self.secret());
        let g = slot.meta();
        let start = slot.start();
        let end = slot.end();
        let old = get_nominal_size(p, end);
        let room = end as usize - p as usize;

        // A coarse sibling counts as the same class.
        if n <= room && n < MMAP_THRESHOLD {
            let nc = size_to_class(n);
            if nc == g.sizeclass() || coarse_sibling(nc) == Some(g.sizeclass()) {
                set_size(p, end, n);
                return Ok(NonNull::new_unchecked(p));
            }
        }

        if g.is_direct() && n >= MMAP_THRESHOLD {
            let shift = p as usize - start as usize;
            let needed = align_up(n + shift + UNIT + IB, self.pages.page_size());
            let old_len = g.map_bytes();
            let base = NonNull::new_unchecked(g.mem() as *mut u8);
            let moved = if needed == old_len {
                Some(base)
            } else {
                self.pages.remap(base, old_len, needed)
            };
            if let Some(base) = moved {
                let mut ctx = self.write();
                let group = base.as_ptr() as *mut Group;
                g.set_mem(group);
                g.set_maplen(needed / MAP_UNIT);
                ctx.counters.mapped_bytes = ctx.counters.mapped_bytes - old_len + needed;
                drop(ctx);
                let p = Group::storage(group).add(shift);
                let end = Group::storage(group).add(needed - UNIT - IB);
                *end = 0;
                set_size(p, end, n);
                return Ok(NonNull::new_unchecked(p));
            }
        }

        let new = self.allocate(n)?;
        ptr::copy_nonoverlapping(p, new.as_ptr(), n.min(old));
        self.deallocate(p);
        Ok(new)
    }

    /// Allocate `len` bytes at a multiple of `align`.
    pub fn allocate_aligned(&self, align: usize, len: usize) -> Result<NonNull<u8>, AllocError> {
        if !align.is_power_of_two() || align < core::mem::size_of::<usize>() || align >= MAX_ALIGN {
            return Err(AllocError::InvalidArgument);
        }
        if len > usize::MAX - align {
            return Err(AllocError::OutOfMemory);
        }
        let align = align.max(UNIT);
        let p = self.allocate(len + align - UNIT)?.as_ptr();
        unsafe {
            let slot = get_meta(p, self.secret());
            let adj = (p as usize).wrapping_neg() & (align - 1);
            if adj == 0 {
                set_size(p, slot.end(), len);
                return Ok(NonNull::new_unchecked(p));
            }
            let q = p.add(adj);
            reframe_aligned(&slot, q, len);
            Ok(NonNull::new_unchecked(q))
        }
    }

    /// Allocate `m * n` zeroed bytes.
    pub fn allocate_zeroed(&self, m: usize, n: usize) -> Result<NonNull<u8>, AllocError> {
        let n = m.checked_mul(n).ok_or(AllocError::OutOfMemory)?;
        let p = self.allocate(n)?;
        unsafe {
            if !self.is_all_zero(p.as_ptr()) {
                ptr::write_bytes(p.as_ptr(), 0, n);
            }
        }
        Ok(p)
    }

    /// Does `p` live in an individual mapping that was fresh, or discarded,
    /// when it was handed out?
    unsafe fn is_all_zero(&self, p: *mut u8) -> bool {
        let slot = get_meta(p, self.secret());
        let g = slot.meta();
        let sc = g.sizeclass();
        sc >= NUM_SIZE_CLASSES || g.stride() < class_stride(sc)
    }

    /// The size last requested for `p`; zero for null.
    ///
    /// # Safety
    /// `p` must be null or a live allocation of this heap.
    pub unsafe fn usable_size(&self, p: *const u8) -> usize {
        if p.is_null() {
            return 0;
        }
        let slot = get_meta(p, self.secret());
        get_nominal_size(p, slot.end())
    }
}
