//! Detection of classes whose groups are repeatedly mapped and unmapped.
//!
//! Every group mapping and unmapping steps a small sequence counter. A class
//! whose group gets mapped again within a few steps of its last unmap counts
//! a bounce; enough bounces mark the class as bouncing, which makes the
//! allocator keep its last group and prefer full-size groups for it.

/// First size class that is tracked.
const FIRST: usize = 7;
/// Number of tracked classes.
const TRACKED: usize = 32;
/// A remap within this many sequence steps of the unmap counts as a bounce.
const WINDOW: u8 = 10;
/// Bounce count at which a class is considered bouncing.
const THRESHOLD: u8 = 100;
/// Where a saturated counter is parked so it takes a while to decay.
const SATURATED: u8 = 150;

pub struct Bounces {
    seq: u8,
    unmap_seq: [u8; TRACKED],
    bounces: [u8; TRACKED],
}

impl Bounces {
    pub const fn new() -> Self {
        Bounces {
            seq: 0,
            unmap_seq: [0; TRACKED],
            bounces: [0; TRACKED],
        }
    }

    #[inline(always)]
    fn slot(sc: usize) -> Option<usize> {
        sc.checked_sub(FIRST).filter(|&i| i < TRACKED)
    }

    /// Advance the sequence counter. Wrapping forgets every recorded unmap.
    pub fn step(&mut self) {
        if self.seq == 255 {
            self.unmap_seq = [0; TRACKED];
            self.seq = 1;
        } else {
            self.seq += 1;
        }
    }

    /// Note that a group of `sc` was just unmapped.
    pub fn record_unmap(&mut self, sc: usize) {
        if let Some(i) = Self::slot(sc) {
            self.unmap_seq[i] = self.seq;
        }
    }

    /// Note that a group of `sc` is about to be mapped.
    pub fn account(&mut self, sc: usize) {
        if let Some(i) = Self::slot(sc) {
            let seq = self.unmap_seq[i];
            if seq != 0 && self.seq.wrapping_sub(seq) < WINDOW {
                if self.bounces[i] + 1 < THRESHOLD {
                    self.bounces[i] += 1;
                } else {
                    self.bounces[i] = SATURATED;
                }
            }
        }
    }

    /// Let the class calm down a little; called whenever slots are
    /// activated without mapping anything.
    pub fn decay(&mut self, sc: usize) {
        if let Some(i) = Self::slot(sc) {
            self.bounces[i] = self.bounces[i].saturating_sub(1);
        }
    }

    #[inline]
    pub fn is_bouncing(&self, sc: usize) -> bool {
        Self::slot(sc).is_some_and(|i| self.bounces[i] >= THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn churn(b: &mut Bounces, sc: usize, rounds: usize) {
        for _ in 0..rounds {
            b.account(sc);
            b.step();
            b.step();
            b.record_unmap(sc);
        }
    }

    #[test]
    fn untracked_classes_never_bounce() {
        let mut b = Bounces::new();
        churn(&mut b, 3, 500);
        churn(&mut b, 40, 500);
        assert!(!b.is_bouncing(3));
        assert!(!b.is_bouncing(40));
        churn(&mut b, 6, 500);
        churn(&mut b, 39, 500);
        assert!(!b.is_bouncing(6));
        assert!(!b.is_bouncing(39));
        churn(&mut b, 38, 120);
        assert!(b.is_bouncing(38));
    }

    #[test]
    fn rapid_remaps_mark_a_class_bouncing() {
        let mut b = Bounces::new();
        churn(&mut b, 20, 98);
        assert!(!b.is_bouncing(20));
        churn(&mut b, 20, 3);
        assert!(b.is_bouncing(20));
        // Saturated counters survive a few decays.
        for _ in 0..40 {
            b.decay(20);
        }
        assert!(b.is_bouncing(20));
        for _ in 0..20 {
            b.decay(20);
        }
        assert!(!b.is_bouncing(20));
    }

    #[test]
    fn distant_remaps_do_not_count() {
        let mut b = Bounces::new();
        for _ in 0..300 {
            b.record_unmap(12);
            for _ in 0..WINDOW {
                b.step();
            }
            b.account(12);
        }
        assert!(!b.is_bouncing(12));
    }
}
