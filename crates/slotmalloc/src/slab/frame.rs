//! In-band slot headers.
//!
//! Every pointer `p` handed out is preceded by four header bytes:
//!
//! ```text
//! p[-4]      0, or 1 when a 32-bit offset is stored at p[-8..-4]
//! p[-3]      slot index (bits 0..5) | reserved-tail code (bits 5..8)
//! p[-2..0]   offset of p from the group's storage, in UNITs
//! ```
//!
//! The reserved-tail code is the gap between the requested size and the end
//! of the slot, 0..=4 literally, or 5 when the exact gap is stored in the
//! slot's last four bytes. Code 6 marks a slot that hosts a nested group and
//! code 7 marks the header at the start of a slot whose user pointer was
//! shifted; its offset field then holds the shift. A freed pointer has
//! `p[-3] == 0xff`, whose index bits never name a valid slot.

use crate::hardening::heap_check;
use crate::slab::mask::SlotMask;
use crate::slab::meta::{Group, Meta, MetaArea};
use crate::slab::size_class::{class_units, DIRECT_CLASS, NUM_SIZE_CLASSES};
use crate::util::{IB, MAP_UNIT, UNIT};
use core::ptr;

/// `p[-3]` of a freed pointer.
pub const FREED_MARKER: u8 = 0xff;
/// Reserved-tail code of a slot hosting a nested group.
pub const HOST_CODE: u8 = 6;
/// Reserved-tail code of a slot-start header recording a shift.
pub const SHIFT_CODE: u8 = 7;

/// A decoded allocation: its group's record and slot index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotRef {
    pub meta: *mut Meta,
    pub index: usize,
}

impl SlotRef {
    #[inline(always)]
    pub fn meta(&self) -> &Meta {
        unsafe { &*self.meta }
    }

    #[inline(always)]
    pub fn start(&self) -> *mut u8 {
        self.meta().slot_start(self.index)
    }

    /// Where the reserved tail ends; the four bytes from here belong to the
    /// next slot's header.
    #[inline(always)]
    pub fn end(&self) -> *mut u8 {
        self.start().wrapping_add(self.meta().stride() - IB)
    }

    #[inline(always)]
    pub fn bit(&self) -> SlotMask {
        SlotMask::single(self.index)
    }
}

#[inline(always)]
unsafe fn read_u16(p: *const u8) -> usize {
    (p as *const u16).read() as usize
}

#[inline(always)]
unsafe fn write_u16(p: *mut u8, v: usize) {
    (p as *mut u16).write(v as u16)
}

#[inline(always)]
unsafe fn read_u32(p: *const u8) -> usize {
    (p as *const u32).read() as usize
}

#[inline(always)]
unsafe fn write_u32(p: *mut u8, v: usize) {
    (p as *mut u32).write(v as u32)
}

#[inline(always)]
pub unsafe fn slot_index(p: *const u8) -> usize {
    (*p.sub(3) & 31) as usize
}

#[inline(always)]
pub unsafe fn is_freed(p: *const u8) -> bool {
    *p.sub(3) == FREED_MARKER
}

/// Recover and validate the record owning `p`, aborting on any sign that
/// `p` was not handed out by this heap or is no longer live.
///
/// # Safety
/// `p` must be readable for its four header bytes.
pub unsafe fn get_meta(p: *const u8, secret: u64) -> SlotRef {
    heap_check!((p as usize) & (UNIT - 1) == 0, "invalid pointer (misaligned)");
    heap_check!(!is_freed(p), "double free detected");
    let mut offset = read_u16(p.sub(2));
    let index = slot_index(p);
    if *p.sub(4) != 0 {
        heap_check!(offset == 0, "invalid pointer (header corrupted)");
        offset = read_u32(p.sub(8));
        heap_check!(offset > 0xffff, "invalid pointer (header corrupted)");
    }
    let base = p.wrapping_sub(UNIT * offset + UNIT) as *mut Group;
    let meta = (*base).meta;
    heap_check!(!meta.is_null(), "invalid pointer (no owning group)");
    let m = &*meta;
    heap_check!(m.mem() == base, "invalid pointer (group mismatch)");
    heap_check!(index <= m.last_idx(), "invalid pointer (slot index)");
    heap_check!(
        !m.avail_mask.load().contains(index),
        "double free detected (slot available)"
    );
    heap_check!(
        !m.freed_mask.load().contains(index),
        "double free detected (slot freed)"
    );
    let area = MetaArea::containing(meta);
    heap_check!((*area).check == secret, "metadata integrity check failed");
    let sc = m.sizeclass();
    if sc < NUM_SIZE_CLASSES {
        let units = class_units(sc);
        heap_check!(
            offset >= units * index && offset < units * (index + 1),
            "invalid pointer (offset outside slot)"
        );
    } else {
        heap_check!(sc == DIRECT_CLASS, "metadata integrity check failed");
    }
    if m.maplen() != 0 {
        heap_check!(
            offset < m.maplen() * MAP_UNIT / UNIT,
            "invalid pointer (offset outside mapping)"
        );
    }
    SlotRef { meta, index }
}

/// Size the caller last asked for, checking the reserved tail and guard
/// bytes on the way.
///
/// # Safety
/// `p` must be a live pointer decoded by [`get_meta`] and `end` its slot end.
pub unsafe fn get_nominal_size(p: *const u8, end: *const u8) -> usize {
    let mut reserved = (*p.sub(3) >> 5) as usize;
    if reserved >= 5 {
        heap_check!(reserved == 5, "invalid pointer (reserved code)");
        reserved = read_u32(end.sub(4));
        heap_check!(reserved >= 5, "heap corruption (reserved tail)");
        heap_check!(*end.sub(5) == 0, "heap corruption (reserved tail)");
    }
    let room = end as usize - p as usize;
    heap_check!(reserved <= room, "heap corruption (reserved tail)");
    heap_check!(*end.sub(reserved) == 0, "heap overflow detected");
    heap_check!(*end == 0, "heap overflow detected (slot end)");
    room - reserved
}

/// Record that `n` bytes at `p` are in use, up to slot end `end`.
///
/// # Safety
/// `p + n <= end` and the tail must be writable.
pub unsafe fn set_size(p: *mut u8, end: *mut u8, n: usize) {
    let mut reserved = end as usize - p as usize - n;
    if reserved != 0 {
        *end.sub(reserved) = 0;
    }
    if reserved >= 5 {
        write_u32(end.sub(4), reserved);
        *end.sub(5) = 0;
        reserved = 5;
    }
    *p.sub(3) = (*p.sub(3) & 31) + ((reserved as u8) << 5);
}

/// Write a fresh header for slot `idx` of `g` holding `n` bytes and return
/// the user pointer.
///
/// The pointer is shifted within the slot by a cycling number of units when
/// there is slack, so a freed address is not handed out again right away.
///
/// # Safety
/// The slot must have just been claimed by the caller.
pub unsafe fn enframe(g: &Meta, idx: usize, n: usize, ctr: usize) -> *mut u8 {
    let stride = g.stride();
    let slack = (stride - IB - n) / UNIT;
    let mut p = Group::storage(g.mem()).add(stride * idx);
    let end = p.add(stride - IB);
    let mut off = if *p.sub(3) != 0 {
        read_u16(p.sub(2)) + 1
    } else {
        ctr
    } & 255;
    heap_check!(*p.sub(4) == 0, "heap corruption (slot header)");
    if off > slack {
        let mut m = slack;
        m |= m >> 1;
        m |= m >> 2;
        m |= m >> 4;
        off &= m;
        if off > slack {
            off -= slack + 1;
        }
        debug_assert!(off <= slack);
    }
    if off != 0 {
        write_u16(p.sub(2), off);
        *p.sub(3) = SHIFT_CODE << 5;
        p = p.add(UNIT * off);
        // A shifted pointer has no permanent check byte; make one.
        *p.sub(4) = 0;
    }
    write_u16(p.sub(2), (p as usize - Group::storage(g.mem()) as usize) / UNIT);
    *p.sub(3) = idx as u8;
    set_size(p, end, n);
    p
}

/// Stamp `p` as freed so a second release traps, and clear its offset so
/// the next user of the slot shifts again.
///
/// # Safety
/// `p` must be a live pointer decoded by [`get_meta`].
#[inline]
pub unsafe fn mark_freed(p: *mut u8) {
    *p.sub(3) = FREED_MARKER;
    write_u16(p.sub(2), 0);
}

/// Re-point an aligned pointer `p` inside slot `slot` at its group and note
/// the shift in the slot-start header.
///
/// # Safety
/// `p` must lie at least `UNIT` bytes past the slot's current user pointer
/// and within the slot.
pub unsafe fn reframe_aligned(slot: &SlotRef, p: *mut u8, n: usize) {
    let g = slot.meta();
    let start = slot.start();
    let offset = (p as usize - Group::storage(g.mem()) as usize) / UNIT;
    if offset <= 0xffff {
        write_u16(p.sub(2), offset);
        *p.sub(4) = 0;
    } else {
        // The 16-bit field must read zero and the check byte nonzero.
        write_u16(p.sub(2), 0);
        write_u32(p.sub(8), offset);
        *p.sub(4) = 1;
    }
    *p.sub(3) = slot.index as u8;
    set_size(p, slot.end(), n);
    write_u16(start.sub(2), (p as usize - start as usize) / UNIT);
    *start.sub(3) = SHIFT_CODE << 5;
}

/// Turn a freshly claimed slot into storage for a nested group of `cnt`
/// slots of `size` bytes: tag the host header and clear every nested check
/// byte, including the guard after the last slot.
///
/// # Safety
/// `p` must be a freshly enframed user pointer with room for the group.
pub unsafe fn mark_host(p: *mut u8, cnt: usize, size: usize) {
    *p.sub(3) = (*p.sub(3) & 31) | (HOST_CODE << 5);
    for i in 0..=cnt {
        *p.add(UNIT + i * size - IB) = 0;
    }
}

/// Zero the group header in place.
///
/// # Safety
/// `p` must be writable for `UNIT` bytes.
pub unsafe fn init_group_header(p: *mut u8, meta: *mut Meta, active_idx: usize) -> *mut Group {
    ptr::write_bytes(p, 0, UNIT);
    let g = p as *mut Group;
    (*g).meta = meta;
    (*g).active_idx = active_idx as u8;
    g
}
