//! Retention of freed mappings.
//!
//! Group mappings, single-slot mappings and direct allocations are parked
//! here after their pages have been discarded, keyed by their exact length,
//! so that a size that keeps being allocated and freed reuses the address
//! range instead of paying for `mmap`/`munmap` every time.

use crate::util::MAP_UNIT;
use core::ptr;

/// Upper bound for the configured number of parked mappings.
pub const MAX_DEPTH: usize = 32;
/// Longest mapping, in units, that is worth parking.
pub const MAX_UNITS: usize = 1024;

pub struct MapCache {
    depth: usize,
    len: usize,
    /// Oldest first.
    maps: [(*mut u8, usize); MAX_DEPTH],
}

impl MapCache {
    pub const fn new(depth: usize) -> Self {
        MapCache {
            depth: if depth > MAX_DEPTH { MAX_DEPTH } else { depth },
            len: 0,
            maps: [(ptr::null_mut(), 0); MAX_DEPTH],
        }
    }

    pub fn set_depth(&mut self, depth: usize) {
        self.depth = depth.min(MAX_DEPTH);
    }

    /// Would a mapping of `maplen` units be parked if it were freed now?
    #[inline]
    pub fn accepts(&self, maplen: usize) -> bool {
        self.depth != 0 && maplen != 0 && maplen <= MAX_UNITS
    }

    /// Park a mapping whose pages already read as zero. When the cache is
    /// full the oldest entry is displaced and returned as `(base, maplen)`.
    pub fn put(&mut self, base: *mut u8, maplen: usize) -> Option<(*mut u8, usize)> {
        debug_assert!(self.accepts(maplen));
        let mut evicted = None;
        if self.len >= self.depth {
            evicted = Some(self.remove(0));
        }
        self.maps[self.len] = (base, maplen);
        self.len += 1;
        evicted
    }

    /// Take back the most recently parked mapping of exactly `maplen` units.
    pub fn take(&mut self, maplen: usize) -> Option<*mut u8> {
        let i = self.maps[..self.len].iter().rposition(|&(_, n)| n == maplen)?;
        Some(self.remove(i).0)
    }

    fn remove(&mut self, i: usize) -> (*mut u8, usize) {
        let entry = self.maps[i];
        self.maps.copy_within(i + 1..self.len, i);
        self.len -= 1;
        self.maps[self.len] = (ptr::null_mut(), 0);
        entry
    }

    /// Number of parked mappings.
    pub fn count(&self) -> usize {
        self.len
    }

    /// Total bytes held by parked mappings.
    pub fn bytes(&self) -> usize {
        self.maps[..self.len].iter().map(|&(_, n)| n * MAP_UNIT).sum()
    }

    /// Visit each parked mapping as `(base, maplen)`, oldest first.
    pub fn for_each(&self, mut f: impl FnMut(*mut u8, usize)) {
        for &(base, maplen) in &self.maps[..self.len] {
            f(base, maplen);
        }
    }
}
