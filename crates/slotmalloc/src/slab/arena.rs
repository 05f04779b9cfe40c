//! Meta record allocator.
//!
//! Records are carved from page-sized areas inside a `PROT_NONE` reservation
//! that is made accessible one area at a time. Each new reservation is twice
//! the size of the previous one, up to a cap, with a guard page in front.
//! Released records go to a free ring and are reused first.

use crate::allocator::AllocError;
use crate::platform::{PageSource, Protection};
use crate::slab::context::Context;
use crate::slab::meta::{dequeue_head, queue, Meta, MetaArea};
use crate::util::{is_aligned, MAP_UNIT};
use core::ptr::{self, NonNull};

/// Reservations stop growing at `2 << MAX_META_SHIFT` pages.
const MAX_META_SHIFT: u32 = 10;

impl Context {
    /// Hand out a zeroed, unlinked meta record.
    pub(crate) fn alloc_meta<P: PageSource>(&mut self, pages: &P) -> Result<*mut Meta, AllocError> {
        debug_assert!(self.init_done);
        let m = unsafe { dequeue_head(&mut self.free_meta_head) };
        if !m.is_null() {
            return Ok(m);
        }
        if self.avail_meta_count == 0 {
            self.carve_meta_area(pages)?;
        }
        self.avail_meta_count -= 1;
        let m = self.avail_meta;
        self.avail_meta = m.wrapping_add(1);
        unsafe { ptr::write(m, Meta::EMPTY) };
        Ok(m)
    }

    /// Return a record to the free ring. Records are reused for unrelated
    /// groups, so every field is cleared.
    ///
    /// # Safety
    /// `m` must be unlinked and no longer referenced by any group.
    pub(crate) unsafe fn free_meta(&mut self, m: *mut Meta) {
        ptr::write(m, Meta::EMPTY);
        queue(&mut self.free_meta_head, m);
    }

    fn carve_meta_area<P: PageSource>(&mut self, pages: &P) -> Result<(), AllocError> {
        let pagesize = self.pagesize;
        if self.avail_meta_area_count == 0 {
            let n = 2usize << self.meta_alloc_shift;
            let base = pages
                .map(n * pagesize, Protection::None)
                .ok_or(AllocError::OutOfMemory)?;
            // The first page stays inaccessible.
            self.avail_meta_areas = base.as_ptr().wrapping_add(pagesize);
            self.avail_meta_area_count = (n - 1) * (pagesize / MAP_UNIT);
            if self.meta_alloc_shift < MAX_META_SHIFT {
                self.meta_alloc_shift += 1;
            }
        }
        let p = self.avail_meta_areas;
        if is_aligned(p as usize, pagesize) {
            // Areas past the first within a large page were opened with it.
            let ok = unsafe {
                pages.protect(NonNull::new_unchecked(p), pagesize, Protection::ReadWrite)
            };
            if !ok {
                return Err(AllocError::OutOfMemory);
            }
        }
        self.avail_meta_area_count -= 1;
        self.avail_meta_areas = p.wrapping_add(MAP_UNIT);

        let area = p as *mut MetaArea;
        unsafe {
            ptr::write(
                area,
                MetaArea {
                    check: self.secret,
                    next: ptr::null_mut(),
                    nslots: MetaArea::SLOTS,
                },
            );
            if let Some(tail) = self.meta_area_tail.as_mut() {
                tail.next = area;
            } else {
                self.meta_area_head = area;
            }
        }
        self.meta_area_tail = area;
        self.avail_meta = MetaArea::slots(area);
        self.avail_meta_count = MetaArea::SLOTS;
        Ok(())
    }

    /// Visit every record ever carved, live or free.
    pub(crate) fn for_each_meta(&self, mut f: impl FnMut(&Meta)) {
        let mut area = self.meta_area_head;
        while let Some(a) = unsafe { area.as_ref() } {
            let slots = MetaArea::slots(area);
            let used = if area == self.meta_area_tail {
                a.nslots - self.avail_meta_count
            } else {
                a.nslots
            };
            for i in 0..used {
                f(unsafe { &*slots.add(i) });
            }
            area = a.next;
        }
    }

    pub(crate) fn meta_area_count(&self) -> usize {
        let mut n = 0;
        let mut area = self.meta_area_head;
        while let Some(a) = unsafe { area.as_ref() } {
            n += 1;
            area = a.next;
        }
        n
    }
}
