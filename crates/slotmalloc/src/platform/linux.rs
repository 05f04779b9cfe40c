use core::ptr;

/// Map anonymous private memory with the given protection.
///
/// # Safety
/// `size` must be page-aligned and non-zero.
pub unsafe fn map_anonymous(size: usize, prot: libc::c_int) -> *mut u8 {
    let result = libc::mmap(
        ptr::null_mut(),
        size,
        prot,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
        -1,
        0,
    );
    if result == libc::MAP_FAILED {
        ptr::null_mut()
    } else {
        result as *mut u8
    }
}

/// Unmap memory.
///
/// # Safety
/// `ptr` must have been returned by `map_anonymous` with the same `size`.
pub unsafe fn unmap(ptr: *mut u8, size: usize) {
    libc::munmap(ptr as *mut libc::c_void, size);
}

/// Change the protection of a mapped range. Returns false on failure.
///
/// # Safety
/// Region must be valid and page-aligned.
pub unsafe fn protect(ptr: *mut u8, size: usize, prot: libc::c_int) -> bool {
    libc::mprotect(ptr as *mut libc::c_void, size, prot) == 0
}

/// Drop the backing pages of a range.
/// On Linux, MADV_DONTNEED guarantees zero-filled pages on next access, so a
/// successful call means the range now reads as zero.
///
/// # Safety
/// Region must be valid and page-aligned.
pub unsafe fn advise_free(ptr: *mut u8, size: usize) -> bool {
    let errno = *libc::__errno_location();
    let ok = libc::madvise(ptr as *mut libc::c_void, size, libc::MADV_DONTNEED) == 0;
    *libc::__errno_location() = errno;
    ok
}

/// Grow or shrink a mapping, possibly moving it. Returns null on failure.
///
/// # Safety
/// `ptr`/`old_size` must describe a whole existing mapping.
pub unsafe fn remap(ptr: *mut u8, old_size: usize, new_size: usize) -> *mut u8 {
    let result = libc::mremap(
        ptr as *mut libc::c_void,
        old_size,
        new_size,
        libc::MREMAP_MAYMOVE,
    );
    if result == libc::MAP_FAILED {
        ptr::null_mut()
    } else {
        result as *mut u8
    }
}

/// Fill `buf` from the kernel entropy pool. Returns false if unavailable.
pub fn fill_random(buf: &mut [u8]) -> bool {
    let n = unsafe {
        libc::getrandom(
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
            libc::GRND_NONBLOCK,
        )
    };
    n == buf.len() as isize
}
