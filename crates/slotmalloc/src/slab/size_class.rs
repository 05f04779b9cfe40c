use crate::util::{IB, MMAP_THRESHOLD, UNIT};

/// Number of slab size classes.
pub const NUM_SIZE_CLASSES: usize = 48;

/// Class assigned to dedicated single-allocation mappings.
pub const DIRECT_CLASS: usize = 63;

/// Slot strides in `UNIT`s. Each group of four roughly doubles the previous
/// one; odd entries in the 4..32 range double as coarse classes.
pub static SIZE_CLASSES: [u16; NUM_SIZE_CLASSES] = [
    1, 2, 3, 4, 5, 6, 7, 8, //
    9, 10, 12, 15, //
    18, 21, 25, 31, //
    36, 42, 51, 63, //
    73, 85, 102, 127, //
    146, 170, 204, 255, //
    292, 341, 409, 511, //
    584, 682, 818, 1023, //
    1169, 1364, 1637, 2047, //
    2340, 2730, 3276, 4095, //
    4680, 5460, 6552, 8191, //
];

/// Map a request size to its slab class: the smallest class whose stride
/// holds `n` bytes plus the in-band header.
///
/// Callers must route `n >= MMAP_THRESHOLD` to a dedicated mapping first.
#[inline]
pub fn size_to_class(n: usize) -> usize {
    debug_assert!(n < MMAP_THRESHOLD);
    let mut n = (n + IB - 1) >> 4;
    if n < 10 {
        return n;
    }
    n += 1;
    let mut i = (28 - (n as u32).leading_zeros() as usize) * 4 + 8;
    if n > SIZE_CLASSES[i + 1] as usize {
        i += 2;
    }
    if n > SIZE_CLASSES[i] as usize {
        i += 1;
    }
    i
}

/// Slot stride of a slab class in bytes.
#[inline(always)]
pub fn class_stride(sc: usize) -> usize {
    UNIT * SIZE_CLASSES[sc] as usize
}

/// Slot capacity of a slab class in `UNIT`s.
#[inline(always)]
pub fn class_units(sc: usize) -> usize {
    SIZE_CLASSES[sc] as usize
}

/// The odd sibling used for early allocations of an even class, if the
/// class has one.
#[inline]
pub fn coarse_sibling(sc: usize) -> Option<usize> {
    if (4..32).contains(&sc) && sc != 6 && sc & 1 == 0 {
        Some(sc | 1)
    } else {
        None
    }
}
