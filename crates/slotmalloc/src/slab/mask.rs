use core::sync::atomic::{AtomicU32, Ordering};

/// Most slots a group can hold. The slot index lives in five header bits and
/// index 31 is reserved for the freed marker.
pub const MAX_SLOTS: usize = 31;

/// A set of slot indices within one group.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct SlotMask(u32);

impl SlotMask {
    pub const EMPTY: SlotMask = SlotMask(0);

    #[inline(always)]
    pub const fn from_bits(bits: u32) -> Self {
        SlotMask(bits)
    }

    #[inline(always)]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Slots `0..=last`.
    #[inline(always)]
    pub const fn up_to(last: usize) -> Self {
        debug_assert!(last < 32);
        SlotMask((2u32 << last).wrapping_sub(1))
    }

    #[inline(always)]
    pub const fn single(idx: usize) -> Self {
        debug_assert!(idx < 32);
        SlotMask(1 << idx)
    }

    #[inline(always)]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline(always)]
    pub const fn contains(self, idx: usize) -> bool {
        self.0 & (1 << idx) != 0
    }

    #[inline(always)]
    pub const fn intersects(self, other: SlotMask) -> bool {
        self.0 & other.0 != 0
    }

    /// The lowest member as a singleton set, or empty.
    #[inline(always)]
    pub const fn lowest(self) -> SlotMask {
        SlotMask(self.0 & self.0.wrapping_neg())
    }

    /// Index of the lowest member. The set must not be empty.
    #[inline(always)]
    pub const fn first_index(self) -> usize {
        debug_assert!(self.0 != 0);
        self.0.trailing_zeros() as usize
    }

    #[inline(always)]
    pub const fn union(self, other: SlotMask) -> SlotMask {
        SlotMask(self.0 | other.0)
    }

    #[inline(always)]
    pub const fn intersection(self, other: SlotMask) -> SlotMask {
        SlotMask(self.0 & other.0)
    }

    #[inline(always)]
    pub const fn difference(self, other: SlotMask) -> SlotMask {
        SlotMask(self.0 & !other.0)
    }

    #[inline(always)]
    pub const fn count(self) -> u32 {
        self.0.count_ones()
    }
}

impl core::fmt::Debug for SlotMask {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "SlotMask({:#034b})", self.0)
    }
}

/// A slot mask shared between the locked paths and the lock-free
/// claim/release paths.
///
/// Claims clear bits in `avail_mask` and releases set bits in `freed_mask`;
/// both publish with release ordering and observe with acquire ordering so
/// that slot contents written before a release are visible to the next
/// claimer.
#[repr(transparent)]
pub struct AtomicSlotMask(AtomicU32);

impl AtomicSlotMask {
    pub const fn new(mask: SlotMask) -> Self {
        AtomicSlotMask(AtomicU32::new(mask.0))
    }

    #[inline(always)]
    pub fn load(&self) -> SlotMask {
        SlotMask(self.0.load(Ordering::Acquire))
    }

    #[inline(always)]
    pub fn store(&self, mask: SlotMask) {
        self.0.store(mask.0, Ordering::Release)
    }

    /// Single compare-and-swap attempt; returns the observed value on failure.
    #[inline(always)]
    pub fn compare_exchange(&self, current: SlotMask, new: SlotMask) -> Result<SlotMask, SlotMask> {
        self.0
            .compare_exchange_weak(current.0, new.0, Ordering::AcqRel, Ordering::Acquire)
            .map(SlotMask)
            .map_err(SlotMask)
    }

    #[inline(always)]
    pub fn fetch_or(&self, mask: SlotMask) -> SlotMask {
        SlotMask(self.0.fetch_or(mask.0, Ordering::AcqRel))
    }

    /// Atomically remove `mask` and return the previous contents.
    #[inline(always)]
    pub fn fetch_remove(&self, mask: SlotMask) -> SlotMask {
        SlotMask(self.0.fetch_and(!mask.0, Ordering::AcqRel))
    }
}
