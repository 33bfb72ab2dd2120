//! # Bucket array (C2)
//!
//! Per-partition singly-linked hash chains over a power-of-two array, grown
//! in fixed-width strides using linear hashing (spec.md §4.1). The array
//! never shrinks and is grown by committing new slots, never by moving
//! existing ones — only the logical `used` count and the chain heads change
//! during a split.

use crate::entry::EntryHandle;

/// `STRIDE_WIDTH` buckets are promoted per incremental stride call
/// (spec.md §4.1 "Incremental stride").
pub const STRIDE_WIDTH: usize = 64;

/// A partition's hash-chain bucket array.
pub struct BucketArray {
    buckets: Vec<Option<EntryHandle>>,
    /// Number of logically populated buckets.
    used: usize,
    /// Physical capacity, always a power of two, always `>= used`.
    size: usize,
    /// Configured ceiling on `used` (and thus on `size`).
    max_buckets: usize,
}

impl BucketArray {
    /// Build a bucket array starting at `initial` buckets (rounded up to a
    /// power of two), capped at `max_buckets`.
    pub fn new(initial: usize, max_buckets: usize) -> Self {
        let size = initial.next_power_of_two().max(1);
        let max_buckets = max_buckets.next_power_of_two().max(size);
        BucketArray {
            buckets: vec![None; size],
            used: size,
            size,
            max_buckets,
        }
    }

    /// Logically populated bucket count.
    pub fn used(&self) -> usize {
        self.used
    }

    /// Physical capacity.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Configured ceiling.
    pub fn max_buckets(&self) -> usize {
        self.max_buckets
    }

    /// Linear-hashing bucket index for a full key hash, given the number of
    /// low bits already consumed by partition selection (spec.md §4.1):
    /// `idx = (hash >> part_bits) & (size - 1)`, folded down by `size/2`
    /// when it lands in the not-yet-split upper half.
    pub fn index(&self, hash: u32, part_bits: u32) -> usize {
        let masked = ((hash as u64 >> part_bits) as usize) & (self.size - 1);
        if masked >= self.used {
            masked - self.size / 2
        } else {
            masked
        }
    }

    /// Head of the chain at a physical bucket index.
    pub fn head(&self, idx: usize) -> Option<EntryHandle> {
        self.buckets[idx]
    }

    /// Replace the head of the chain at a physical bucket index.
    pub fn set_head(&mut self, idx: usize, handle: Option<EntryHandle>) {
        self.buckets[idx] = handle;
    }

    /// `true` while `used` has not reached `max_buckets`.
    pub fn has_headroom(&self) -> bool {
        self.used < self.max_buckets
    }

    /// Live entries per populated bucket, for the stride-scheduling
    /// threshold in spec.md §4.1.
    pub fn load_factor(&self, live_entries: usize) -> f64 {
        if self.used == 0 {
            0.0
        } else {
            live_entries as f64 / self.used as f64
        }
    }

    /// Perform the bookkeeping half of one incremental split: enlarge the
    /// physical array if `used` has reached the current `size` (spec.md
    /// §4.1: "If used is currently a power of two, the bucket array is
    /// first enlarged..."), then return the `(source, target)` bucket
    /// indices to migrate, advancing `used` by one. Returns `None` if the
    /// partition is already at `max_buckets`, or if growth fails (caller
    /// logs and the partition stops growing, per spec.md §7).
    pub fn split_one(&mut self) -> Option<(usize, usize)> {
        if self.used >= self.max_buckets {
            return None;
        }
        if self.used == self.size {
            let new_size = self.size * 2;
            if new_size > self.max_buckets {
                return None;
            }
            self.buckets.resize(new_size, None);
            self.size = new_size;
        }
        let source = self.used - self.size / 2;
        let target = source + self.size / 2;
        self.used += 1;
        Some((source, target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_folds_into_populated_half() {
        let buckets = BucketArray::new(16, 256);
        // size == used == 16 here, so no folding should occur yet.
        for h in 0u32..64 {
            let idx = buckets.index(h, 0);
            assert!(idx < buckets.used());
        }
    }

    #[test]
    fn split_one_enlarges_when_used_hits_size() {
        let mut buckets = BucketArray::new(4, 64);
        assert_eq!(buckets.used(), 4);
        assert_eq!(buckets.size(), 4);

        let (source, target) = buckets.split_one().unwrap();
        assert_eq!(buckets.size(), 8, "enlarging should happen before the split");
        assert_eq!(source, 0);
        assert_eq!(target, 4);
        assert_eq!(buckets.used(), 5);
    }

    #[test]
    fn split_one_stops_at_max_buckets() {
        let mut buckets = BucketArray::new(4, 4);
        assert!(buckets.split_one().is_none());
    }

    #[test]
    fn split_sequence_covers_whole_lower_half_before_next_enlarge() {
        let mut buckets = BucketArray::new(4, 64);
        let mut sources = Vec::new();
        for _ in 0..4 {
            let (source, _target) = buckets.split_one().unwrap();
            sources.push(source);
        }
        assert_eq!(sources, vec![0, 1, 2, 3]);
        assert_eq!(buckets.used(), 8);
        assert_eq!(buckets.size(), 8);
    }
}
