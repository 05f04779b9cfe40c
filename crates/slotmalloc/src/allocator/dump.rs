use super::Heap;
use crate::platform::PageSource;
use crate::slab::meta::{ring_len, Meta};
use crate::slab::size_class::{class_stride, NUM_SIZE_CLASSES};
use core::fmt::{self, Write};

/// One character per slot: available, inactive, freed, or in use.
fn write_group(out: &mut impl Write, g: &Meta) -> fmt::Result {
    write!(
        out,
        "{:p}: {:p} [{} slots] [class {} ({})]: ",
        g,
        g.mem(),
        g.slot_count(),
        g.sizeclass(),
        g.stride()
    )?;
    let avail = g.avail_mask.load();
    let freed = g.freed_mask.load();
    let active = g.active_idx();
    for i in 0..g.slot_count() {
        let c = if avail.contains(i) {
            'a'
        } else if i > active {
            'i'
        } else if freed.contains(i) {
            'f'
        } else {
            '_'
        };
        out.write_char(c)?;
    }
    out.write_char('\n')
}

fn write_ring(out: &mut impl Write, head: *mut Meta) -> fmt::Result {
    let mut m = head;
    while let Some(g) = unsafe { m.as_ref() } {
        write_group(out, g)?;
        m = g.next();
        if m == head {
            break;
        }
    }
    Ok(())
}

impl<P: PageSource> Heap<P> {
    /// Write a human-readable picture of the heap to `out`.
    ///
    /// `out` must not allocate from this heap; the write lock is held.
    pub fn dump(&self, out: &mut impl Write) -> fmt::Result {
        let ctx = self.write();
        writeln!(out, "free meta records: {}", unsafe { ring_len(ctx.free_meta_head) })?;
        writeln!(out, "available new meta records: {}", ctx.avail_meta_count)?;
        writeln!(out, "available new meta areas: {}", ctx.avail_meta_area_count)?;

        writeln!(out, "entirely filled, inactive groups:")?;
        let mut result = Ok(());
        ctx.for_each_meta(|g| {
            if result.is_ok() && !g.mem().is_null() && !g.is_linked() {
                result = write_group(out, g);
            }
        });
        result?;

        writeln!(out, "free groups by size class:")?;
        for sc in 0..NUM_SIZE_CLASSES {
            if ctx.active[sc].is_null() {
                continue;
            }
            writeln!(
                out,
                "-- class {} ({}) ({} used) --",
                sc,
                class_stride(sc),
                ctx.usage_by_class[sc]
            )?;
            write_ring(out, ctx.active[sc])?;
        }

        writeln!(out, "retained mappings:")?;
        let mut result = Ok(());
        ctx.map_cache.for_each(|base, maplen| {
            if result.is_ok() {
                result = writeln!(out, "{:p} [{} pages]", base, maplen);
            }
        });
        result?;

        let c = &ctx.counters;
        writeln!(
            out,
            "mapped: {} ({} bytes), total maps {}, total unmaps {}",
            c.mapped_count, c.mapped_bytes, c.total_map_count, c.total_unmap_count
        )
    }
}
