use crate::config::Config;
use crate::large::cache::MapCache;
use crate::slab::bounce::Bounces;
use crate::slab::meta::{Meta, MetaArea};
use crate::slab::size_class::NUM_SIZE_CLASSES;
use core::ptr;

/// Running totals of what the heap holds from the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Counters {
    /// Live group and direct mappings.
    pub mapped_count: usize,
    /// Sum of their lengths.
    pub mapped_bytes: usize,
    /// Mappings ever created, including ones served from the retention cache.
    pub total_map_count: u64,
    /// Mappings ever given back or parked.
    pub total_unmap_count: u64,
}

/// All mutable allocator state of one heap.
///
/// Mutated only under the heap's write lock. The read-locked claim path reads
/// it through a shared reference and touches nothing but group masks.
pub struct Context {
    pub init_done: bool,
    pub secret: u64,
    pub pagesize: usize,
    /// Bumped for every new group or direct mapping; seeds slot offsets.
    pub mmap_counter: usize,

    pub free_meta_head: *mut Meta,
    pub avail_meta: *mut Meta,
    pub avail_meta_count: usize,
    pub avail_meta_areas: *mut u8,
    pub avail_meta_area_count: usize,
    pub meta_alloc_shift: u32,
    pub meta_area_head: *mut MetaArea,
    pub meta_area_tail: *mut MetaArea,

    pub active: [*mut Meta; NUM_SIZE_CLASSES],
    /// Slot capacity held by each class's groups.
    pub usage_by_class: [usize; NUM_SIZE_CLASSES],
    pub bounces: Bounces,
    pub map_cache: MapCache,
    pub counters: Counters,
}

unsafe impl Send for Context {}
unsafe impl Sync for Context {}

impl Context {
    pub const fn new(config: &Config) -> Self {
        Context {
            init_done: false,
            secret: 0,
            pagesize: 0,
            mmap_counter: 0,
            free_meta_head: ptr::null_mut(),
            avail_meta: ptr::null_mut(),
            avail_meta_count: 0,
            avail_meta_areas: ptr::null_mut(),
            avail_meta_area_count: 0,
            meta_alloc_shift: 0,
            meta_area_head: ptr::null_mut(),
            meta_area_tail: ptr::null_mut(),
            active: [ptr::null_mut(); NUM_SIZE_CLASSES],
            usage_by_class: [0; NUM_SIZE_CLASSES],
            bounces: Bounces::new(),
            map_cache: MapCache::new(config.map_cache_depth),
            counters: Counters {
                mapped_count: 0,
                mapped_bytes: 0,
                total_map_count: 0,
                total_unmap_count: 0,
            },
        }
    }

    pub(crate) fn note_map(&mut self, len: usize) {
        self.counters.mapped_count += 1;
        self.counters.mapped_bytes += len;
        self.counters.total_map_count += 1;
    }

    pub(crate) fn note_unmap(&mut self, len: usize) {
        self.counters.mapped_count -= 1;
        self.counters.mapped_bytes -= len;
        self.counters.total_unmap_count += 1;
    }
}
