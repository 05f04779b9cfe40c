use core::ptr::NonNull;

#[cfg(target_os = "linux")]
pub mod linux;
#[cfg(target_os = "linux")]
pub use linux as sys;

/// Access permissions for a mapped range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Protection {
    None,
    ReadWrite,
}

/// Virtual memory primitives consumed by the heap.
///
/// # Safety
/// Implementors must hand out fresh, zero-filled, page-aligned mappings that
/// no other code touches, must never allocate from the heap that uses them,
/// and `unmap` must be callable without any heap lock held.
pub unsafe trait PageSource {
    /// Granularity of every length passed to the methods below.
    fn page_size(&self) -> usize;

    /// Map `len` bytes of anonymous memory.
    fn map(&self, len: usize, prot: Protection) -> Option<NonNull<u8>>;

    /// # Safety
    /// `base`/`len` must describe a whole mapping returned by `map` or `remap`.
    unsafe fn unmap(&self, base: NonNull<u8>, len: usize);

    /// # Safety
    /// The range must lie within a live mapping and be page-aligned.
    unsafe fn protect(&self, base: NonNull<u8>, len: usize, prot: Protection) -> bool;

    /// Best-effort release of the pages backing the range. Returns true only
    /// if the range is now guaranteed to read as zero.
    ///
    /// # Safety
    /// The range must lie within a live mapping and be page-aligned.
    unsafe fn decommit(&self, base: NonNull<u8>, len: usize) -> bool;

    /// Resize a mapping, possibly moving it. `None` leaves the old mapping
    /// untouched.
    ///
    /// # Safety
    /// `base`/`old_len` must describe a whole live mapping.
    unsafe fn remap(&self, base: NonNull<u8>, old_len: usize, new_len: usize) -> Option<NonNull<u8>>;
}

/// The operating system's anonymous mappings.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemPages;

impl Protection {
    fn as_prot(self) -> libc::c_int {
        match self {
            Protection::None => libc::PROT_NONE,
            Protection::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
        }
    }
}

unsafe impl PageSource for SystemPages {
    #[inline]
    fn page_size(&self) -> usize {
        crate::util::page_size()
    }

    fn map(&self, len: usize, prot: Protection) -> Option<NonNull<u8>> {
        NonNull::new(unsafe { sys::map_anonymous(len, prot.as_prot()) })
    }

    unsafe fn unmap(&self, base: NonNull<u8>, len: usize) {
        let errno = *libc::__errno_location();
        sys::unmap(base.as_ptr(), len);
        *libc::__errno_location() = errno;
    }

    unsafe fn protect(&self, base: NonNull<u8>, len: usize, prot: Protection) -> bool {
        sys::protect(base.as_ptr(), len, prot.as_prot())
    }

    unsafe fn decommit(&self, base: NonNull<u8>, len: usize) -> bool {
        sys::advise_free(base.as_ptr(), len)
    }

    unsafe fn remap(&self, base: NonNull<u8>, old_len: usize, new_len: usize) -> Option<NonNull<u8>> {
        NonNull::new(sys::remap(base.as_ptr(), old_len, new_len))
    }
}

/// A random value for tagging metadata areas. Prefers the kernel entropy
/// pool and falls back to address-derived mixing.
pub fn random_secret() -> u64 {
    let mut buf = [0u8; 8];
    if sys::fill_random(&mut buf) {
        return u64::from_le_bytes(buf);
    }
    fast_random_u64()
}

/// Get a fast, non-cryptographic random u64.
pub fn fast_random_u64() -> u64 {
    // Use stack address as a simple entropy source mixed with a counter
    static COUNTER: core::sync::atomic::AtomicU64 = core::sync::atomic::AtomicU64::new(0);
    let count = COUNTER.fetch_add(1, core::sync::atomic::Ordering::Relaxed);
    let stack_addr = &count as *const _ as u64;
    let mut x = stack_addr.wrapping_mul(0x517cc1b727220a95).wrapping_add(count);
    x ^= x >> 33;
    x = x.wrapping_mul(0xff51afd7ed558ccd);
    x ^= x >> 33;
    x = x.wrapping_mul(0xc4ceb9fe1a85ec53);
    x ^= x >> 33;
    x
}
