//! Fork safety: pthread_atfork handlers for the process heap.
//!
//! The parent takes the heap's write lock before `fork()` so no other thread
//! is halfway through a structural change when the address space is copied.
//! The parent then releases it; the child, which has only the forking
//! thread, simply forgets every holder.

use crate::init::heap_unchecked;

unsafe extern "C" fn atfork_prepare() {
    heap_unchecked().lock_for_fork();
}

unsafe extern "C" fn atfork_parent() {
    heap_unchecked().unlock_after_fork();
}

/// # Safety
/// Called by the C runtime in the child process after fork(). Only one
/// thread exists at that point.
unsafe extern "C" fn atfork_child() {
    heap_unchecked().reset_after_fork();
}

/// Register the pthread_atfork handlers. Must be called once during init.
///
/// # Safety
/// Must be called from the initialization path.
pub unsafe fn register_atfork() {
    libc::pthread_atfork(Some(atfork_prepare), Some(atfork_parent), Some(atfork_child));
}
