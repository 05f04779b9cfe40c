//! Group lifecycle: creation, slot activation, and dissolution.
//!
//! Everything here runs under the heap's write lock. The lock-free paths in
//! `allocator` only ever clear bits of `avail_mask` on the ring head or set
//! bits of `freed_mask`, so the ring and usage bookkeeping below can be read
//! and written without further synchronization.

use crate::allocator::AllocError;
use crate::hardening::heap_check;
use crate::platform::{PageSource, Protection};
use crate::slab::context::Context;
use crate::slab::frame::{enframe, get_meta, init_group_header, mark_host};
use crate::slab::mask::SlotMask;
use crate::slab::meta::{dequeue, queue, Meta, Storage};
use crate::slab::size_class::{class_stride, size_to_class, NUM_SIZE_CLASSES};
use crate::util::{align_up, IB, MAP_UNIT, UNIT};
use core::ptr::NonNull;

/// Slot counts for the smallest classes, picked by current usage.
const SMALL_COUNTS: [[u8; 3]; 9] = [
    [30, 30, 30],
    [31, 15, 15],
    [20, 10, 10],
    [31, 15, 7],
    [25, 12, 6],
    [21, 10, 5],
    [18, 8, 4],
    [31, 15, 7],
    [28, 14, 6],
];

/// Starting slot counts for the larger classes, by position within their
/// group of four.
const MEDIUM_COUNTS: [u8; 4] = [28, 24, 20, 30];

/// Slot offsets are stored in 16 bits of UNITs.
const MAX_GROUP_BYTES: usize = 65536 * UNIT;

/// Only slots within this many bytes of a fresh mapping start out usable.
const ACTIVATION_SPAN: usize = 4096;

/// A mapping to hand back to the OS once the lock is dropped.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapInfo {
    pub base: NonNull<u8>,
    pub len: usize,
}

impl MapInfo {
    /// # Safety
    /// Must be called exactly once, without the heap lock held.
    pub unsafe fn release<P: PageSource>(self, pages: &P) {
        pages.unmap(self.base, self.len);
    }
}

impl Context {
    /// Create a group for class `sc` sized for usage so far, with its first
    /// slots activated. `req` is the request that triggered it.
    unsafe fn alloc_group<P: PageSource>(
        &mut self,
        pages: &P,
        sc: usize,
        req: usize,
    ) -> Result<*mut Meta, AllocError> {
        let size = class_stride(sc);
        let m = self.alloc_meta(pages)?;
        let mut usage = self.usage_by_class[sc];
        let pagesize = self.pagesize;

        let mut cnt = if sc < SMALL_COUNTS.len() {
            let row = &SMALL_COUNTS[sc];
            let mut i = 0;
            while i < 2 && 4 * row[i] as usize > usage {
                i += 1;
            }
            row[i] as usize
        } else {
            let mut cnt = MEDIUM_COUNTS[sc & 3] as usize;
            while cnt & 1 == 0 && 4 * cnt > usage {
                cnt >>= 1;
            }
            while size * cnt >= MAX_GROUP_BYTES {
                cnt >>= 1;
            }
            cnt
        };
        if cnt == 1 && size + UNIT <= pagesize / 2 {
            cnt = 2;
        }

        let p: *mut u8;
        let active_idx;
        if size * cnt + UNIT > pagesize / 2 {
            // Bouncing classes always get full-size groups.
            let nosmall = self.bounces.is_bouncing(sc);
            self.bounces.account(sc);
            self.bounces.step();

            if sc & 1 == 0 && sc < 32 {
                usage += self.usage_by_class[sc + 1];
            }
            if 4 * cnt > usage && !nosmall {
                let bytes = size * cnt;
                cnt = match sc & 3 {
                    1 if bytes > 8 * pagesize => 2,
                    2 if bytes > 4 * pagesize => 3,
                    0 if bytes > 8 * pagesize => 3,
                    0 if bytes > 2 * pagesize => 5,
                    _ => cnt,
                };
            }
            let mut needed = align_up(size * cnt + UNIT, pagesize);
            if !nosmall && cnt <= 7 {
                // A mapping sized to this one request may be the better deal.
                let tight = align_up(req + IB + UNIT, pagesize);
                if tight < size + UNIT || (tight >= 4 * pagesize && 2 * cnt > usage) {
                    cnt = 1;
                    needed = tight;
                }
            }

            let base = match self.map_cache.take(needed / MAP_UNIT) {
                Some(base) => base,
                None => match pages.map(needed, Protection::ReadWrite) {
                    Some(base) => base.as_ptr(),
                    None => {
                        self.free_meta(m);
                        return Err(AllocError::OutOfMemory);
                    }
                },
            };
            self.note_map(needed);
            (*m).set_maplen(needed / MAP_UNIT);
            self.mmap_counter = self.mmap_counter.wrapping_add(1);
            p = base;
            active_idx = ((ACTIVATION_SPAN - UNIT) / size).saturating_sub(1).min(cnt - 1);
        } else {
            let host_req = UNIT + cnt * size - IB;
            let j = size_to_class(host_req);
            let idx = match self.alloc_slot(pages, j, host_req) {
                Ok(idx) => idx,
                Err(e) => {
                    self.free_meta(m);
                    return Err(e);
                }
            };
            let host = &*self.active[j];
            p = enframe(host, idx, class_stride(j) - IB, self.mmap_counter);
            mark_host(p, cnt, size);
            active_idx = cnt - 1;
        }

        self.usage_by_class[sc] += cnt;
        let avail = SlotMask::up_to(active_idx);
        let g = &*m;
        g.avail_mask.store(avail);
        g.freed_mask.store(SlotMask::up_to(cnt - 1).difference(avail));
        g.set_mem(init_group_header(p, m, active_idx));
        g.set_last_idx(cnt - 1);
        g.set_freeable(true);
        g.set_sizeclass(sc);
        Ok(m)
    }

    /// Move the activated part of `freed_mask` into `avail_mask` and return
    /// the new available set.
    pub(crate) fn activate_group(g: &Meta) -> SlotMask {
        let act = SlotMask::up_to(g.active_idx());
        let taken = g.freed_mask.fetch_remove(act).intersection(act);
        let mask = g.avail_mask.load().union(taken);
        g.avail_mask.store(mask);
        mask
    }

    /// Extend the activated range of `g` to the end of the next page-sized
    /// span, at least one slot further.
    fn expand_active(g: &Meta) {
        let size = g.stride();
        let next = g.active_idx() + 2;
        let limit = align_up(UNIT + size * next, ACTIVATION_SPAN);
        let cnt = ((limit - UNIT) / size).max(next).min(g.slot_count());
        g.set_active_idx(cnt - 1);
    }

    /// Find an available slot in the ring of class `sc`, rotating past
    /// exhausted groups and activating freed slots as needed. The winning
    /// group becomes the ring head and the slot is removed from its avail
    /// mask.
    unsafe fn try_avail(&mut self, sc: usize) -> SlotMask {
        let mut m = self.active[sc];
        if m.is_null() {
            return SlotMask::EMPTY;
        }
        let mut mask = (*m).avail_mask.load();
        if mask.is_empty() {
            if (*m).freed_mask.load().is_empty() {
                dequeue(&mut self.active[sc], m);
                m = self.active[sc];
                if m.is_null() {
                    return SlotMask::EMPTY;
                }
            } else {
                m = (*m).next();
                self.active[sc] = m;
            }

            // A fully free group is only worth touching if nothing else is
            // available; it may be dissolved soon.
            let g = &*m;
            if g.freed_mask.load() == g.all_slots() && g.freeable() {
                m = g.next();
                self.active[sc] = m;
            }

            let g = &*m;
            if !g.freed_mask.load().intersects(SlotMask::up_to(g.active_idx())) {
                // Prefer another group over dirtying untouched pages.
                if g.next() != m {
                    m = g.next();
                    self.active[sc] = m;
                }
                let g = &*m;
                if !g.freed_mask.load().intersects(SlotMask::up_to(g.active_idx())) {
                    Self::expand_active(g);
                }
            }

            mask = Self::activate_group(&*m);
            if mask.is_empty() {
                dequeue(&mut self.active[sc], m);
                return SlotMask::EMPTY;
            }
            self.bounces.decay(sc);
        }
        let first = mask.lowest();
        (*m).avail_mask.store(mask.difference(first));
        first
    }

    /// Claim a slot of class `sc` under the write lock, creating a group if
    /// every existing one is exhausted. The slot belongs to the ring head.
    pub(crate) unsafe fn alloc_slot<P: PageSource>(
        &mut self,
        pages: &P,
        sc: usize,
        req: usize,
    ) -> Result<usize, AllocError> {
        let first = self.try_avail(sc);
        if !first.is_empty() {
            return Ok(first.first_index());
        }
        let m = self.alloc_group(pages, sc, req)?;
        let g = &*m;
        g.avail_mask.fetch_remove(SlotMask::single(0));
        queue(&mut self.active[sc], m);
        self.active[sc] = m;
        Ok(0)
    }

    /// Should a group that just became fully free be given back?
    pub(crate) fn okay_to_free(&self, g: &Meta) -> bool {
        if !g.freeable() {
            return false;
        }
        let sc = g.sizeclass();
        // Direct mappings and single-slot groups sized to one request.
        if sc >= NUM_SIZE_CLASSES || g.stride() < class_stride(sc) {
            return true;
        }
        if g.storage_kind() == Storage::Nested {
            return true;
        }
        // Another non-full group can take over.
        if g.next() != g as *const Meta as *mut Meta {
            return true;
        }

        let cnt = g.slot_count();
        let usage = self.usage_by_class[sc];
        if 4 * cnt <= usage {
            // A low-count group under heavy usage is worth replacing with a
            // full-count one.
            return cnt < 20 && 2 * cnt <= (usage - cnt) / 2;
        }
        if sc < 24 {
            return false;
        }
        !self.bounces.is_bouncing(sc)
    }

    /// Dissolve a fully free, unlinked group. A mapping that cannot be
    /// retained, or that retaining this one displaced, is returned for
    /// unmapping outside the lock.
    pub(crate) unsafe fn free_group<P: PageSource>(
        &mut self,
        pages: &P,
        m: *mut Meta,
    ) -> Option<MapInfo> {
        let g = &*m;
        let sc = g.sizeclass();
        if g.is_slab() {
            self.usage_by_class[sc] -= g.slot_count();
        }
        let unmap = match g.storage_kind() {
            Storage::Mapped { pages: maplen } | Storage::Single { pages: maplen } => {
                self.bounces.step();
                self.bounces.record_unmap(sc);
                let len = maplen * MAP_UNIT;
                let base = NonNull::new_unchecked(g.mem() as *mut u8);
                self.note_unmap(len);
                if self.map_cache.accepts(maplen) && pages.decommit(base, len) {
                    self.map_cache
                        .put(base.as_ptr(), maplen)
                        .map(|(base, maplen)| MapInfo {
                            base: NonNull::new_unchecked(base),
                            len: maplen * MAP_UNIT,
                        })
                } else {
                    Some(MapInfo { base, len })
                }
            }
            Storage::Nested => {
                // The group lives in a slot of a larger class; release that slot.
                let p = g.mem() as *mut u8;
                let host = get_meta(p, self.secret);
                (*g.mem()).meta = core::ptr::null_mut();
                self.nontrivial_free(pages, host.meta, host.index)
            }
        };
        self.free_meta(m);
        unmap
    }

    /// Release slot `i` of `m` when the lock-free path cannot: the group is
    /// becoming fully free, or it was full and must rejoin its ring.
    pub(crate) unsafe fn nontrivial_free<P: PageSource>(
        &mut self,
        pages: &P,
        m: *mut Meta,
        i: usize,
    ) -> Option<MapInfo> {
        let g = &*m;
        let sc = g.sizeclass();
        let bit = SlotMask::single(i);
        let mask = g.freed_mask.load().union(g.avail_mask.load());

        if mask.union(bit) == g.all_slots() && self.okay_to_free(g) {
            if g.is_linked() {
                heap_check!(g.is_slab(), "metadata integrity check failed");
                let was_head = self.active[sc] == m;
                dequeue(&mut self.active[sc], m);
                if was_head {
                    if let Some(head) = self.active[sc].as_ref() {
                        Self::activate_group(head);
                    }
                }
            }
            return self.free_group(pages, m);
        }
        if mask.is_empty() && !g.is_linked() {
            heap_check!(g.is_slab(), "metadata integrity check failed");
            queue(&mut self.active[sc], m);
        }
        g.freed_mask.fetch_or(bit);
        None
    }
}
