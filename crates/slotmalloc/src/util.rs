/// Allocation granule. Slot strides, group headers and returned pointers are
/// all multiples of this.
pub const UNIT: usize = 16;

/// In-band header bytes that precede every returned pointer.
pub const IB: usize = 4;

/// Requests at or above this size get a dedicated mapping.
pub const MMAP_THRESHOLD: usize = 131052;

/// Largest alignment accepted by `allocate_aligned` (exclusive).
pub const MAX_ALIGN: usize = 1 << 30;

/// `maplen` is counted in these units regardless of the system page size.
pub const MAP_UNIT: usize = 4096;

/// Align `value` up to the next multiple of `align`.
/// `align` must be a power of two.
#[inline(always)]
pub const fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

/// Align `value` down to the previous multiple of `align`.
/// `align` must be a power of two.
#[inline(always)]
pub const fn align_down(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    value & !(align - 1)
}

/// Check if `value` is aligned to `align`.
#[inline(always)]
pub const fn is_aligned(value: usize, align: usize) -> bool {
    value & (align - 1) == 0
}

/// Runtime page size, initialized from sysconf(_SC_PAGESIZE) on first use.
static PAGE_SIZE_CACHED: core::sync::atomic::AtomicUsize = core::sync::atomic::AtomicUsize::new(0);

/// Get the system page size, querying the OS the first time.
#[inline]
pub fn page_size() -> usize {
    let cached = PAGE_SIZE_CACHED.load(core::sync::atomic::Ordering::Relaxed);
    if cached != 0 {
        return cached;
    }
    let ps = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    // Never smaller than the meta area size.
    let ps = if ps >= MAP_UNIT as libc::c_long {
        ps as usize
    } else {
        MAP_UNIT
    };
    PAGE_SIZE_CACHED.store(ps, core::sync::atomic::Ordering::Relaxed);
    ps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_helpers() {
        assert_eq!(align_up(0, 16), 0);
        assert_eq!(align_up(1, 16), 16);
        assert_eq!(align_up(4097, 4096), 8192);
        assert_eq!(align_down(4097, 4096), 4096);
        assert!(is_aligned(48, 16));
        assert!(!is_aligned(40, 16));
    }

    #[test]
    fn page_size_is_power_of_two_and_at_least_4k() {
        let ps = page_size();
        assert!(ps.is_power_of_two());
        assert!(ps >= MAP_UNIT);
        assert_eq!(page_size(), ps);
    }
}
