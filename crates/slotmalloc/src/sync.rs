use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// A readers/writer lock built on futex.
/// We cannot use std::sync::RwLock because it may allocate.
///
/// When the heap is configured single-threaded every operation is a no-op.
pub struct FutexRwLock {
    /// WRITER | WAITING | reader count
    state: AtomicU32,
    threaded: AtomicBool,
}

const WRITER: u32 = 1 << 31;
const WAITING: u32 = 1 << 30;
const READERS: u32 = WAITING - 1;

/// The heap state lock.
pub type RwLock<T> = lock_api::RwLock<FutexRwLock, T>;
pub type WriteGuard<'a, T> = lock_api::RwLockWriteGuard<'a, FutexRwLock, T>;

impl FutexRwLock {
    pub const fn new(threaded: bool) -> Self {
        Self {
            state: AtomicU32::new(0),
            threaded: AtomicBool::new(threaded),
        }
    }

    #[inline(always)]
    pub fn is_threaded(&self) -> bool {
        self.threaded.load(Ordering::Relaxed)
    }

    /// Switch between real locking and no-op mode. Only valid while nothing
    /// holds the lock and no other thread uses it.
    pub fn set_threaded(&self, threaded: bool) {
        debug_assert_eq!(self.state.load(Ordering::Relaxed), 0);
        self.threaded.store(threaded, Ordering::Relaxed);
    }

    /// Forget any holders. Only for a forked child, which has one thread.
    pub unsafe fn reset(&self) {
        self.state.store(0, Ordering::Release);
    }

    #[cold]
    fn lock_shared_slow(&self) {
        loop {
            let s = self.state.load(Ordering::Relaxed);
            if s & WRITER == 0 && s & READERS != READERS {
                if self
                    .state
                    .compare_exchange_weak(s, s + 1, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
                {
                    return;
                }
                continue;
            }
            self.park(s);
        }
    }

    #[cold]
    fn lock_exclusive_slow(&self) {
        loop {
            let s = self.state.load(Ordering::Relaxed);
            if s & (WRITER | READERS) == 0 {
                if self
                    .state
                    .compare_exchange_weak(s, s | WRITER, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
                {
                    return;
                }
                continue;
            }
            self.park(s);
        }
    }

    /// Flag a waiter and sleep until the state word changes from `s`.
    fn park(&self, s: u32) {
        if s & WAITING == 0
            && self
                .state
                .compare_exchange(s, s | WAITING, Ordering::Relaxed, Ordering::Relaxed)
                .is_err()
        {
            return;
        }
        futex_wait(&self.state, s | WAITING);
    }
}

unsafe impl lock_api::RawRwLock for FutexRwLock {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: FutexRwLock = FutexRwLock::new(true);

    type GuardMarker = lock_api::GuardSend;

    #[inline]
    fn lock_shared(&self) {
        if !self.try_lock_shared() {
            self.lock_shared_slow();
        }
    }

    #[inline]
    fn try_lock_shared(&self) -> bool {
        if !self.is_threaded() {
            return true;
        }
        let s = self.state.load(Ordering::Relaxed);
        s & WRITER == 0
            && s & READERS != READERS
            && self
                .state
                .compare_exchange(s, s + 1, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
    }

    #[inline]
    unsafe fn unlock_shared(&self) {
        if !self.is_threaded() {
            return;
        }
        let prev = self.state.fetch_sub(1, Ordering::Release);
        if prev & READERS == 1 && prev & WAITING != 0 {
            self.state.fetch_and(!WAITING, Ordering::Relaxed);
            futex_wake_all(&self.state);
        }
    }

    #[inline]
    fn lock_exclusive(&self) {
        if !self.try_lock_exclusive() {
            self.lock_exclusive_slow();
        }
    }

    #[inline]
    fn try_lock_exclusive(&self) -> bool {
        if !self.is_threaded() {
            return true;
        }
        self.state
            .compare_exchange(0, WRITER, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    #[inline]
    unsafe fn unlock_exclusive(&self) {
        if !self.is_threaded() {
            return;
        }
        let prev = self.state.swap(0, Ordering::Release);
        if prev & WAITING != 0 {
            futex_wake_all(&self.state);
        }
    }

    #[inline]
    fn is_locked(&self) -> bool {
        self.state.load(Ordering::Relaxed) & (WRITER | READERS) != 0
    }
}

fn futex_wait(state: &AtomicU32, expected: u32) {
    #[cfg(target_os = "linux")]
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            state as *const AtomicU32,
            libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
            expected,
            core::ptr::null::<libc::timespec>(),
        );
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = (state, expected);
        core::hint::spin_loop();
    }
}

fn futex_wake_all(state: &AtomicU32) {
    #[cfg(target_os = "linux")]
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            state as *const AtomicU32,
            libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
            i32::MAX,
        );
    }
    #[cfg(not(target_os = "linux"))]
    let _ = state;
}
