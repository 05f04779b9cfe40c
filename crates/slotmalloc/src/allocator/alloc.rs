use super::{AllocError, Heap};
use crate::platform::{PageSource, Protection};
use crate::slab::context::Context;
use crate::slab::frame::{enframe, init_group_header};
use crate::slab::meta::Meta;
use crate::slab::size_class::{coarse_sibling, size_to_class, DIRECT_CLASS};
use crate::util::{align_up, IB, MAP_UNIT, MMAP_THRESHOLD, UNIT};
use core::ptr::NonNull;

/// Requests this large fail before any size arithmetic can overflow.
pub(crate) const MAX_REQUEST: usize = usize::MAX / 2 - 4096;

impl<P: PageSource> Heap<P> {
    /// Allocate `n` bytes aligned to 16.
    pub fn allocate(&self, n: usize) -> Result<NonNull<u8>, AllocError> {
        if n >= MAX_REQUEST {
            return Err(AllocError::OutOfMemory);
        }
        if n >= MMAP_THRESHOLD {
            return self.allocate_direct(n);
        }
        let mut sc = size_to_class(n);

        let ctx = self.state.read();
        if ctx.init_done {
            sc = Self::widen_class(&ctx, sc);
            if let Some((g, idx)) = self.claim(&ctx, sc) {
                let ctr = ctx.mmap_counter;
                drop(ctx);
                return Ok(unsafe { Self::frame(g, idx, n, ctr) });
            }
        }
        drop(ctx);

        let mut ctx = self.write();
        let sc = Self::widen_class(&ctx, sc);
        let idx = unsafe { ctx.alloc_slot(&self.pages, sc, n)? };
        let g = ctx.active[sc];
        let ctr = ctx.mmap_counter;
        drop(ctx);
        Ok(unsafe { Self::frame(g, idx, n, ctr) })
    }

    /// Before an even class has any group, serve it from its odd sibling
    /// while that sibling is lightly used, so the first group can be small.
    fn widen_class(ctx: &Context, sc: usize) -> usize {
        let Some(odd) = coarse_sibling(sc) else {
            return sc;
        };
        if !ctx.active[sc].is_null() || ctx.usage_by_class[sc] != 0 {
            return sc;
        }
        let mut usage = ctx.usage_by_class[odd];
        // Count the group a miss would create.
        let head = unsafe { ctx.active[odd].as_ref() };
        if head.map_or(true, |g| {
            g.avail_mask.load().is_empty() && g.freed_mask.load().is_empty()
        }) {
            usage += 3;
        }
        if usage <= 12 {
            odd
        } else {
            sc
        }
    }

    /// Take the lowest available slot of the ring head without the write
    /// lock.
    fn claim(&self, ctx: &Context, sc: usize) -> Option<(*mut Meta, usize)> {
        let m = ctx.active[sc];
        let g = unsafe { m.as_ref() }?;
        let threaded = self.threaded();
        loop {
            let mask = g.avail_mask.load();
            let first = mask.lowest();
            if first.is_empty() {
                return None;
            }
            let rest = mask.difference(first);
            if !threaded {
                g.avail_mask.store(rest);
            } else if g.avail_mask.compare_exchange(mask, rest).is_err() {
                continue;
            }
            return Some((m, first.first_index()));
        }
    }

    /// # Safety
    /// Slot `idx` of `g` must have just been claimed by the caller.
    #[inline]
    unsafe fn frame(g: *mut Meta, idx: usize, n: usize, ctr: usize) -> NonNull<u8> {
        NonNull::new_unchecked(enframe(&*g, idx, n, ctr))
    }

    /// Serve a request too large for any class from its own mapping.
    fn allocate_direct(&self, n: usize) -> Result<NonNull<u8>, AllocError> {
        let needed = align_up(n + IB + UNIT, self.pages.page_size());
        let parked = self.write().map_cache.take(needed / MAP_UNIT);
        let base = match parked.and_then(NonNull::new) {
            Some(base) => base,
            None => self
                .pages
                .map(needed, Protection::ReadWrite)
                .ok_or(AllocError::OutOfMemory)?,
        };

        let mut ctx = self.write();
        ctx.bounces.step();
        let m = match ctx.alloc_meta(&self.pages) {
            Ok(m) => m,
            Err(e) => {
                drop(ctx);
                unsafe { self.pages.unmap(base, needed) };
                return Err(e);
            }
        };
        let g = unsafe { &*m };
        g.set_mem(unsafe { init_group_header(base.as_ptr(), m, 0) });
        g.set_sizeclass(DIRECT_CLASS);
        g.set_last_idx(0);
        g.set_maplen(needed / MAP_UNIT);
        g.set_freeable(true);
        ctx.mmap_counter = ctx.mmap_counter.wrapping_add(1);
        ctx.note_map(needed);
        let ctr = ctx.mmap_counter;
        drop(ctx);
        Ok(unsafe { Self::frame(m, 0, n, ctr) })
    }
}
