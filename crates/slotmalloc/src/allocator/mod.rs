//! The heap: one lock-protected [`Context`] plus the lock-free fast paths
//! around it.

mod alloc;
mod dump;
mod free;
mod resize;

use crate::config::Config;
use crate::platform::{random_secret, PageSource, SystemPages};
use crate::slab::context::{Context, Counters};
use crate::slab::meta::ring_len;
use crate::slab::size_class::NUM_SIZE_CLASSES;
use crate::sync::{FutexRwLock, RwLock, WriteGuard};
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use lock_api::RawRwLock;

/// Why an allocation request could not be served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// The OS refused memory, or the size computation overflowed.
    OutOfMemory,
    /// The alignment is not a power of two, is smaller than a pointer, or is
    /// unreasonably large.
    InvalidArgument,
}

impl AllocError {
    /// The C `errno` value for this error.
    pub fn errno(self) -> libc::c_int {
        match self {
            AllocError::OutOfMemory => libc::ENOMEM,
            AllocError::InvalidArgument => libc::EINVAL,
        }
    }
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocError::OutOfMemory => f.write_str("out of memory"),
            AllocError::InvalidArgument => f.write_str("invalid alignment"),
        }
    }
}

impl std::error::Error for AllocError {}

/// A consistent snapshot of heap bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    /// Slot capacity of every class's groups.
    pub usage_by_class: [usize; NUM_SIZE_CLASSES],
    /// Groups linked in each class's ring.
    pub ring_len_by_class: [usize; NUM_SIZE_CLASSES],
    /// Records waiting for reuse.
    pub free_metas: usize,
    /// Record areas carved so far.
    pub meta_areas: usize,
    /// Freed mappings parked for reuse.
    pub retained_maps: usize,
    pub retained_bytes: usize,
    pub counters: Counters,
}

/// A slab allocator instance.
///
/// The process-wide heap behind the C entry points is one static `Heap`;
/// tests and embedders can build their own, with any [`PageSource`].
pub struct Heap<P: PageSource = SystemPages> {
    state: RwLock<Context>,
    /// Copy of the area tag, readable by the lock-free release path.
    secret: AtomicU64,
    release_free_pages: AtomicBool,
    pages: P,
}

impl Heap<SystemPages> {
    pub const fn new(config: Config) -> Self {
        Heap::with_pages(SystemPages, config)
    }
}

impl<P: PageSource> Heap<P> {
    pub const fn with_pages(pages: P, config: Config) -> Self {
        Heap {
            state: RwLock::const_new(
                FutexRwLock::new(!config.single_threaded),
                Context::new(&config),
            ),
            secret: AtomicU64::new(0),
            release_free_pages: AtomicBool::new(config.release_free_pages),
            pages,
        }
    }

    pub fn pages(&self) -> &P {
        &self.pages
    }

    /// Apply a configuration to a heap that may already hold allocations.
    ///
    /// # Safety
    /// No other thread may be using the heap.
    pub unsafe fn configure(&self, config: &Config) {
        self.release_free_pages
            .store(config.release_free_pages, Ordering::Relaxed);
        self.state.write().map_cache.set_depth(config.map_cache_depth);
        self.state.raw().set_threaded(!config.single_threaded);
    }

    #[inline(always)]
    fn threaded(&self) -> bool {
        unsafe { self.state.raw() }.is_threaded()
    }

    #[inline(always)]
    fn secret(&self) -> u64 {
        self.secret.load(Ordering::Relaxed)
    }

    /// Take the write lock, initializing the context on first use.
    fn write(&self) -> WriteGuard<'_, Context> {
        let mut ctx = self.state.write();
        if !ctx.init_done {
            ctx.pagesize = self.pages.page_size();
            ctx.secret = random_secret();
            self.secret.store(ctx.secret, Ordering::Relaxed);
            ctx.init_done = true;
        }
        ctx
    }

    pub fn stats(&self) -> HeapStats {
        let ctx = self.write();
        let mut ring_len_by_class = [0; NUM_SIZE_CLASSES];
        for (n, &head) in ring_len_by_class.iter_mut().zip(ctx.active.iter()) {
            *n = unsafe { ring_len(head) };
        }
        HeapStats {
            usage_by_class: ctx.usage_by_class,
            ring_len_by_class,
            free_metas: unsafe { ring_len(ctx.free_meta_head) },
            meta_areas: ctx.meta_area_count(),
            retained_maps: ctx.map_cache.count(),
            retained_bytes: ctx.map_cache.bytes(),
            counters: ctx.counters,
        }
    }

    /// Hold the write lock across `fork` so the child sees a quiescent heap.
    pub(crate) fn lock_for_fork(&self) {
        unsafe { self.state.raw() }.lock_exclusive();
    }

    /// # Safety
    /// Must pair with [`lock_for_fork`](Self::lock_for_fork) in the parent.
    pub(crate) unsafe fn unlock_after_fork(&self) {
        self.state.raw().unlock_exclusive();
    }

    /// # Safety
    /// Only for the single thread of a freshly forked child.
    pub(crate) unsafe fn reset_after_fork(&self) {
        self.state.raw().reset();
    }
}
