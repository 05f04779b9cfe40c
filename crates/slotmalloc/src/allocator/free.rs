use super::Heap;
use crate::hardening::heap_check;
use crate::platform::PageSource;
use crate::slab::frame::{get_meta, get_nominal_size, mark_freed, SlotRef};
use crate::util::{align_down, align_up};
use core::ptr::NonNull;
use core::sync::atomic::Ordering;

impl<P: PageSource> Heap<P> {
    /// Release an allocation. Null is ignored; anything this heap did not
    /// hand out, or already took back, aborts the process.
    ///
    /// # Safety
    /// `p` must be null or a pointer whose header bytes are readable.
    pub unsafe fn deallocate(&self, p: *mut u8) {
        if p.is_null() {
            return;
        }
        let slot = get_meta(p, self.secret());
        let g = slot.meta();
        get_nominal_size(p, slot.end());
        let bit = slot.bit();
        let all = g.all_slots();

        if self.release_free_pages.load(Ordering::Relaxed) && g.last_idx() > 0 {
            self.release_pages(&slot);
        }
        mark_freed(p);

        loop {
            let freed = g.freed_mask.load();
            let avail = g.avail_mask.load();
            let mask = freed.union(avail);
            heap_check!(!mask.intersects(bit), "double free detected (slot released)");
            // The first release into a full group and the last one into a
            // group need the ring.
            if freed.is_empty() || mask.union(bit) == all {
                break;
            }
            if !self.threaded() {
                g.freed_mask.store(freed.union(bit));
                return;
            }
            if g.freed_mask.compare_exchange(freed, freed.union(bit)).is_ok() {
                return;
            }
        }

        let unmap = {
            let mut ctx = self.write();
            ctx.nontrivial_free(&self.pages, slot.meta, slot.index)
        };
        if let Some(map) = unmap {
            map.release(&self.pages);
        }
    }

    /// Give back the whole pages inside a slot that is about to be freed.
    unsafe fn release_pages(&self, slot: &SlotRef) {
        let pagesize = self.pages.page_size();
        let start = align_up(slot.start() as usize, pagesize);
        let end = slot.end() as usize;
        if end <= start {
            return;
        }
        let len = align_down(end - start, pagesize);
        if len != 0 {
            self.pages
                .decommit(NonNull::new_unchecked(start as *mut u8), len);
        }
    }
}
