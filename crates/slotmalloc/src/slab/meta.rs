//! Out-of-band group descriptors and the rings that link them.

use crate::slab::mask::{AtomicSlotMask, SlotMask};
use crate::slab::size_class::{class_stride, DIRECT_CLASS, NUM_SIZE_CLASSES};
use crate::util::{MAP_UNIT, UNIT};
use core::cell::Cell;
use core::ptr;

/// Header at the start of every group. Slot storage begins right after it,
/// so the last four header bytes double as slot 0's in-band header.
#[repr(C)]
pub struct Group {
    pub meta: *mut Meta,
    /// Highest slot index handed to the avail mask so far.
    pub active_idx: u8,
    _pad: [u8; UNIT - core::mem::size_of::<*mut Meta>() - 1],
}

const _: () = assert!(core::mem::size_of::<Group>() == UNIT);

impl Group {
    #[inline(always)]
    pub fn storage(group: *mut Group) -> *mut u8 {
        (group as *mut u8).wrapping_add(UNIT)
    }
}

/// How a group's storage is backed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Storage {
    /// A slot of a larger class hosts the group.
    Nested,
    /// A multi-slot group with its own mapping.
    Mapped { pages: usize },
    /// A single-slot mapping, either a direct allocation or a group sized to
    /// one request.
    Single { pages: usize },
}

/// Descriptor for one group. Lives in a [`MetaArea`], never inside the group.
///
/// `prev`/`next` link the record into exactly one ring: its class's active
/// ring, the free-meta ring, or none while the group is full.
#[repr(C)]
pub struct Meta {
    prev: Cell<*mut Meta>,
    next: Cell<*mut Meta>,
    mem: Cell<*mut Group>,
    /// Slots that can be claimed right now.
    pub avail_mask: AtomicSlotMask,
    /// Slots returned since the last activation, plus slots not yet activated.
    pub freed_mask: AtomicSlotMask,
    last_idx: Cell<u8>,
    freeable: Cell<bool>,
    sizeclass: Cell<u8>,
    /// Length of the backing mapping in `MAP_UNIT`s; zero when nested.
    maplen: Cell<usize>,
}

impl Meta {
    #[allow(clippy::declare_interior_mutable_const)]
    pub const EMPTY: Meta = Meta {
        prev: Cell::new(ptr::null_mut()),
        next: Cell::new(ptr::null_mut()),
        mem: Cell::new(ptr::null_mut()),
        avail_mask: AtomicSlotMask::new(SlotMask::EMPTY),
        freed_mask: AtomicSlotMask::new(SlotMask::EMPTY),
        last_idx: Cell::new(0),
        freeable: Cell::new(false),
        sizeclass: Cell::new(0),
        maplen: Cell::new(0),
    };

    #[inline(always)]
    pub fn prev(&self) -> *mut Meta {
        self.prev.get()
    }

    #[inline(always)]
    pub fn next(&self) -> *mut Meta {
        self.next.get()
    }

    #[inline(always)]
    pub fn mem(&self) -> *mut Group {
        self.mem.get()
    }

    #[inline(always)]
    pub fn set_mem(&self, mem: *mut Group) {
        self.mem.set(mem);
    }

    #[inline(always)]
    pub fn last_idx(&self) -> usize {
        self.last_idx.get() as usize
    }

    #[inline(always)]
    pub fn set_last_idx(&self, idx: usize) {
        self.last_idx.set(idx as u8);
    }

    #[inline(always)]
    pub fn slot_count(&self) -> usize {
        self.last_idx() + 1
    }

    #[inline(always)]
    pub fn all_slots(&self) -> SlotMask {
        SlotMask::up_to(self.last_idx())
    }

    #[inline(always)]
    pub fn freeable(&self) -> bool {
        self.freeable.get()
    }

    #[inline(always)]
    pub fn set_freeable(&self, freeable: bool) {
        self.freeable.set(freeable);
    }

    #[inline(always)]
    pub fn sizeclass(&self) -> usize {
        self.sizeclass.get() as usize
    }

    #[inline(always)]
    pub fn set_sizeclass(&self, sc: usize) {
        self.sizeclass.set(sc as u8);
    }

    #[inline(always)]
    pub fn maplen(&self) -> usize {
        self.maplen.get()
    }

    #[inline(always)]
    pub fn set_maplen(&self, maplen: usize) {
        self.maplen.set(maplen);
    }

    /// Byte length of the backing mapping, zero when nested.
    #[inline(always)]
    pub fn map_bytes(&self) -> usize {
        self.maplen() * MAP_UNIT
    }

    pub fn storage_kind(&self) -> Storage {
        match self.maplen() {
            0 => Storage::Nested,
            pages if self.last_idx() == 0 => Storage::Single { pages },
            pages => Storage::Mapped { pages },
        }
    }

    /// Distance between consecutive slots. Single-slot mappings use the whole
    /// mapping, which can be smaller than the class stride.
    #[inline]
    pub fn stride(&self) -> usize {
        if self.last_idx() == 0 && self.maplen() != 0 {
            self.map_bytes() - UNIT
        } else {
            class_stride(self.sizeclass())
        }
    }

    /// Start of slot `idx`.
    #[inline(always)]
    pub fn slot_start(&self, idx: usize) -> *mut u8 {
        Group::storage(self.mem()).wrapping_add(self.stride() * idx)
    }

    /// Highest slot index that is currently activated.
    #[inline(always)]
    pub fn active_idx(&self) -> usize {
        unsafe { (*self.mem()).active_idx as usize }
    }

    #[inline(always)]
    pub fn set_active_idx(&self, idx: usize) {
        unsafe { (*self.mem()).active_idx = idx as u8 };
    }

    #[inline(always)]
    pub fn is_direct(&self) -> bool {
        self.sizeclass() == DIRECT_CLASS
    }

    #[inline(always)]
    pub fn is_slab(&self) -> bool {
        self.sizeclass() < NUM_SIZE_CLASSES
    }

    /// Is this record linked into any ring?
    #[inline(always)]
    pub fn is_linked(&self) -> bool {
        !self.next().is_null()
    }
}

/// Insert `m` at the tail of the ring headed by `*head`. An empty ring gets
/// `m` as its head.
///
/// # Safety
/// `m` must be unlinked and every record in the ring must be live.
pub unsafe fn queue(head: &mut *mut Meta, m: *mut Meta) {
    let mr = &*m;
    debug_assert!(mr.next().is_null() && mr.prev().is_null());
    if let Some(h) = head.as_ref() {
        let tail = h.prev();
        mr.next.set(*head);
        mr.prev.set(tail);
        (*tail).next.set(m);
        h.prev.set(m);
    } else {
        mr.prev.set(m);
        mr.next.set(m);
        *head = m;
    }
}

/// Unlink `m` from the ring headed by `*head`, advancing the head if `m`
/// was it.
///
/// # Safety
/// `m` must be a member of that ring.
pub unsafe fn dequeue(head: &mut *mut Meta, m: *mut Meta) {
    let mr = &*m;
    if mr.next() != m {
        (*mr.prev()).next.set(mr.next());
        (*mr.next()).prev.set(mr.prev());
        if *head == m {
            *head = mr.next();
        }
    } else {
        *head = ptr::null_mut();
    }
    mr.prev.set(ptr::null_mut());
    mr.next.set(ptr::null_mut());
}

/// Unlink and return the head of a ring.
///
/// # Safety
/// Every record in the ring must be live.
pub unsafe fn dequeue_head(head: &mut *mut Meta) -> *mut Meta {
    let m = *head;
    if !m.is_null() {
        dequeue(head, m);
    }
    m
}

/// Number of records in a ring.
///
/// # Safety
/// Every record in the ring must be live.
pub unsafe fn ring_len(head: *mut Meta) -> usize {
    let mut n = 0;
    let mut m = head;
    if m.is_null() {
        return 0;
    }
    loop {
        n += 1;
        m = (*m).next();
        if m == head {
            return n;
        }
    }
}

/// A page-sized arena of meta records, tagged with the heap secret.
#[repr(C)]
pub struct MetaArea {
    pub check: u64,
    pub next: *mut MetaArea,
    pub nslots: usize,
}

impl MetaArea {
    /// Records per area.
    pub const SLOTS: usize =
        (MAP_UNIT - core::mem::size_of::<MetaArea>()) / core::mem::size_of::<Meta>();

    #[inline(always)]
    pub fn slots(area: *mut MetaArea) -> *mut Meta {
        (area as *mut u8).wrapping_add(core::mem::size_of::<MetaArea>()) as *mut Meta
    }

    /// The area a record was carved from.
    #[inline(always)]
    pub fn containing(m: *const Meta) -> *const MetaArea {
        (m as usize & !(MAP_UNIT - 1)) as *const MetaArea
    }
}

const _: () = assert!(core::mem::size_of::<MetaArea>() % core::mem::align_of::<Meta>() == 0);
