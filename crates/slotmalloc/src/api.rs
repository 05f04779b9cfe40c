use crate::hardening::StderrSink;
use crate::init;
use core::ffi::c_void;
use core::ptr;

/// Turn a heap result into a C return value, setting `errno` on failure.
macro_rules! or_errno {
    ($result:expr) => {{
        match $result {
            Ok(p) => p.as_ptr() as *mut c_void,
            Err(e) => {
                set_errno(e.errno());
                ptr::null_mut()
            }
        }
    }};
}

#[inline]
unsafe fn set_errno(e: libc::c_int) {
    *libc::__errno_location() = e;
}

/// C callers may ask for alignments below a pointer; treat them as a pointer.
#[inline]
fn c_alignment(alignment: usize) -> usize {
    if alignment.is_power_of_two() {
        alignment.max(core::mem::size_of::<*mut c_void>())
    } else {
        alignment
    }
}

// ============================================================================
// Standard C allocator API
// ============================================================================

#[cfg_attr(feature = "export-symbols", no_mangle)]
pub unsafe extern "C" fn malloc(size: usize) -> *mut c_void {
    or_errno!(init::heap().allocate(size))
}

#[cfg_attr(feature = "export-symbols", no_mangle)]
pub unsafe extern "C" fn free(ptr: *mut c_void) {
    if ptr.is_null() {
        return;
    }
    init::heap().deallocate(ptr as *mut u8);
}

#[cfg_attr(feature = "export-symbols", no_mangle)]
pub unsafe extern "C" fn realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    or_errno!(init::heap().reallocate(ptr as *mut u8, size))
}

#[cfg_attr(feature = "export-symbols", no_mangle)]
pub unsafe extern "C" fn calloc(nmemb: usize, size: usize) -> *mut c_void {
    or_errno!(init::heap().allocate_zeroed(nmemb, size))
}

// ============================================================================
// POSIX alignment APIs
// ============================================================================

#[cfg_attr(feature = "export-symbols", no_mangle)]
pub unsafe extern "C" fn posix_memalign(
    memptr: *mut *mut c_void,
    alignment: usize,
    size: usize,
) -> libc::c_int {
    if memptr.is_null() {
        return libc::EINVAL;
    }
    // posix_memalign reports errors by return value and leaves errno alone.
    match init::heap().allocate_aligned(alignment, size) {
        Ok(p) => {
            *memptr = p.as_ptr() as *mut c_void;
            0
        }
        Err(e) => e.errno(),
    }
}

#[cfg_attr(feature = "export-symbols", no_mangle)]
pub unsafe extern "C" fn aligned_alloc(alignment: usize, size: usize) -> *mut c_void {
    or_errno!(init::heap().allocate_aligned(c_alignment(alignment), size))
}

#[cfg_attr(feature = "export-symbols", no_mangle)]
pub unsafe extern "C" fn memalign(alignment: usize, size: usize) -> *mut c_void {
    or_errno!(init::heap().allocate_aligned(c_alignment(alignment), size))
}

#[cfg_attr(feature = "export-symbols", no_mangle)]
pub unsafe extern "C" fn valloc(size: usize) -> *mut c_void {
    let page_size = crate::util::page_size();
    or_errno!(init::heap().allocate_aligned(page_size, size))
}

#[cfg_attr(feature = "export-symbols", no_mangle)]
pub unsafe extern "C" fn pvalloc(size: usize) -> *mut c_void {
    let page_size = crate::util::page_size();
    if size > usize::MAX - page_size {
        set_errno(libc::ENOMEM);
        return ptr::null_mut();
    }
    let rounded = crate::util::align_up(size.max(1), page_size);
    or_errno!(init::heap().allocate_aligned(page_size, rounded))
}

// ============================================================================
// GNU extensions
// ============================================================================

#[cfg_attr(feature = "export-symbols", no_mangle)]
pub unsafe extern "C" fn malloc_usable_size(ptr: *mut c_void) -> usize {
    init::heap().usable_size(ptr as *const u8)
}

/// Print the process heap's groups and counters to stderr.
#[cfg_attr(feature = "export-symbols", no_mangle)]
pub unsafe extern "C" fn slotmalloc_dump() {
    let _ = init::heap().dump(&mut StderrSink);
}
