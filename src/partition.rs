//! # Partition (C4)
//!
//! One shard of the table: a bucket array (C2) plus an entry pool (C1), a
//! per-partition stamp counter, a flush stamp, a clock hand, and the
//! load-factor bookkeeping that schedules incremental stride (§4.1) and
//! clock-hand eviction (§4.1). A `Partition` is a plain, non-thread-safe
//! struct; the synchronization discipline that makes it safe to share
//! across workers lives one layer up, in the dispatch strategies (C6).
//!
//! Unlinking an entry always reclaims its slot immediately — no
//! `EntryHandle` ever escapes a dispatch strategy's critical section, so
//! reusing the index is safe the instant it is unlinked. Its `ValueRegion`
//! is handed back to the caller instead of freed in place: a `lookup` that
//! ran earlier may have handed a reader a `Bytes` clone of that region's
//! value that is still being written out over a slow socket. Freeing the
//! region through the allocator right away would reclaim its byte budget
//! while those bytes are still logically spoken for, letting the arena
//! over-commit. The caller retires returned regions through the
//! reclamation epoch (C7) instead, deferring the allocator's bookkeeping
//! update until no in-flight reader could still be relying on it.

use crate::alloc::ValueRegion;
use crate::bucket::BucketArray;
use crate::entry::{Entry, EntryHandle, EntryPool, USED_MIN};

/// One shard of the table, selected by the low `log2(nparts)` bits of a
/// key's hash.
pub struct Partition {
    /// Index of this partition within the table, for diagnostics.
    pub id: usize,
    /// Number of low hash bits already consumed by partition selection;
    /// bucket indexing (spec.md §4.1) shifts them off before masking.
    part_bits: u32,
    buckets: BucketArray,
    entries: EntryPool,
    /// Monotonic per-partition insertion counter; doubles as the CAS token.
    stamp: u64,
    /// Entries with `stamp < flush_stamp` are logically flushed.
    flush_stamp: u64,
    /// Clock-hand cursor into the entry pool, for eviction sweeps.
    clock_hand: usize,
    /// Guards against more than one outstanding eviction task.
    evicting: bool,
    /// Guards against more than one outstanding stride task.
    striding: bool,
    /// Sum of `entry_size` over all live entries.
    volume: u64,
    /// Configured cap on `volume` for this partition.
    volume_cap: u64,
    /// Count of entries currently reachable from a bucket chain.
    live_count: usize,
}

impl Partition {
    /// Build a new, empty partition.
    pub fn new(
        id: usize,
        part_bits: u32,
        initial_buckets: usize,
        max_buckets: usize,
        max_entries: usize,
        volume_cap: u64,
    ) -> Self {
        Partition {
            id,
            part_bits,
            buckets: BucketArray::new(initial_buckets, max_buckets),
            entries: EntryPool::new(max_entries),
            stamp: 0,
            flush_stamp: 0,
            clock_hand: 0,
            evicting: false,
            striding: false,
            volume: 0,
            volume_cap,
            live_count: 0,
        }
    }

    /// Issue the next CAS stamp. Strictly increasing per spec.md §8.
    pub fn next_stamp(&mut self) -> u64 {
        self.stamp += 1;
        self.stamp
    }

    /// Current stamp counter, without advancing it.
    pub fn current_stamp(&self) -> u64 {
        self.stamp
    }

    /// Borrow the entry pool (used by the action engine to fill newly
    /// allocated slots before publishing them).
    pub fn entries(&self) -> &EntryPool {
        &self.entries
    }

    /// Mutably borrow the entry pool.
    pub fn entries_mut(&mut self) -> &mut EntryPool {
        &mut self.entries
    }

    /// Borrow one entry.
    pub fn entry(&self, handle: EntryHandle) -> &Entry {
        self.entries.get(handle)
    }

    /// Mutably borrow one entry.
    pub fn entry_mut(&mut self, handle: EntryHandle) -> &mut Entry {
        self.entries.get_mut(handle)
    }

    /// Reserve a free slot from the entry pool, growing it if there is
    /// headroom. `None` means the pool is at capacity and eviction must run
    /// first.
    pub fn allocate_slot(&mut self) -> Option<EntryHandle> {
        self.entries.allocate()
    }

    /// Release a vacated slot's resources back to the pool. Caller must
    /// have already taken the slot's `region` (and freed it via the value
    /// allocator) before calling this.
    pub fn release_slot(&mut self, handle: EntryHandle) {
        self.entries.release(handle);
    }

    /// Bucket index for a full key hash.
    pub fn bucket_index(&self, hash: u32) -> usize {
        self.buckets.index(hash, self.part_bits)
    }

    /// `true` if `stamp` predates the last `flush_all`.
    pub fn is_flushed(&self, stamp: u64) -> bool {
        stamp < self.flush_stamp
    }

    /// `true` if an entry is expired by either time or logical flush.
    pub fn is_expired(&self, entry: &Entry, now: u32) -> bool {
        entry.is_time_expired(now) || self.is_flushed(entry.stamp)
    }

    /// Walk bucket `idx`'s chain, lazily unlinking and fully reclaiming any
    /// expired entries encountered (their regions are pushed onto
    /// `expired_out` for the caller to retire through the reclamation
    /// epoch — see the module doc comment on why that handoff still
    /// matters even though the slot itself is freed immediately), and
    /// return the handle of the first live, non-expired entry whose key
    /// matches, if any. Does not itself unlink the match.
    pub fn find(
        &mut self,
        idx: usize,
        hash: u32,
        key: &[u8],
        now: u32,
        expired_out: &mut Vec<ValueRegion>,
    ) -> Option<EntryHandle> {
        let mut prev: Option<EntryHandle> = None;
        let mut cur = self.buckets.head(idx);
        let mut found = None;
        while let Some(h) = cur {
            let next = self.entries.get(h).next;
            if self.is_expired(self.entries.get(h), now) {
                self.unlink_at(idx, prev, h, next);
                if let Some(region) = self.reclaim_slot(h) {
                    expired_out.push(region);
                }
                cur = next;
                continue;
            }
            let entry = self.entries.get(h);
            if found.is_none() && entry.hash == hash && entry.key() == key {
                found = Some(h);
            }
            prev = Some(h);
            cur = next;
        }
        found
    }

    /// Unlink an already-located entry from bucket `idx`'s chain and fully
    /// reclaim its slot, handing back its region for deferred retirement.
    pub fn unlink(&mut self, idx: usize, handle: EntryHandle) -> Option<ValueRegion> {
        let mut prev: Option<EntryHandle> = None;
        let mut cur = self.buckets.head(idx);
        while let Some(h) = cur {
            let next = self.entries.get(h).next;
            if h == handle {
                self.unlink_at(idx, prev, h, next);
                return self.reclaim_slot(h);
            }
            prev = Some(h);
            cur = next;
        }
        None
    }

    fn unlink_at(
        &mut self,
        idx: usize,
        prev: Option<EntryHandle>,
        handle: EntryHandle,
        next: Option<EntryHandle>,
    ) {
        match prev {
            Some(p) => self.entries.get_mut(p).next = next,
            None => self.buckets.set_head(idx, next),
        }
        let size = self.entries.get(handle).entry_size();
        self.entries.get_mut(handle).next = None;
        self.volume = self.volume.saturating_sub(size);
        self.live_count = self.live_count.saturating_sub(1);
    }

    /// Take an unlinked slot's region out and return it to the free list.
    /// Safe to do synchronously, unlike freeing the region's bytes through
    /// the allocator: nothing outside the partition's own critical section
    /// ever holds an `EntryHandle`, so the slot index can be reused the
    /// moment it is unlinked. A `Bytes` clone of the value handed to an
    /// earlier caller, however, may still be streaming out over a slow
    /// socket — see the module doc comment.
    fn reclaim_slot(&mut self, handle: EntryHandle) -> Option<ValueRegion> {
        let region = self.entries.get_mut(handle).region.take();
        self.entries.release(handle);
        region
    }

    /// Publish a filled, not-yet-linked entry at the head of bucket `idx`'s
    /// chain, making it live.
    pub fn publish(&mut self, idx: usize, handle: EntryHandle) {
        let head = self.buckets.head(idx);
        let size;
        {
            let e = self.entries.get_mut(handle);
            e.state = USED_MIN;
            e.next = head;
            size = e.entry_size();
        }
        self.buckets.set_head(idx, Some(handle));
        self.volume += size;
        self.live_count += 1;
    }

    /// Sum of `entry_size` over all live entries.
    pub fn volume(&self) -> u64 {
        self.volume
    }

    /// Configured volume cap.
    pub fn volume_cap(&self) -> u64 {
        self.volume_cap
    }

    /// Count of entries reachable from a bucket chain.
    pub fn live_count(&self) -> usize {
        self.live_count
    }

    /// `true` when volume exceeds the configured cap and an eviction task
    /// should be scheduled (spec.md §4.1 "Thresholds").
    pub fn needs_eviction(&self) -> bool {
        self.volume > self.volume_cap
    }

    /// `true` when entries-per-bucket exceeds 2 and there is headroom to
    /// grow (spec.md §4.1 "Thresholds").
    pub fn needs_stride(&self) -> bool {
        self.buckets.load_factor(self.live_count) > 2.0 && self.buckets.has_headroom()
    }

    /// Test-and-set the eviction gate; `true` if this call acquired it.
    pub fn try_begin_evict(&mut self) -> bool {
        if self.evicting {
            false
        } else {
            self.evicting = true;
            true
        }
    }

    /// Release the eviction gate.
    pub fn end_evict(&mut self) {
        self.evicting = false;
    }

    /// Test-and-set the stride gate; `true` if this call acquired it.
    pub fn try_begin_stride(&mut self) -> bool {
        if self.striding {
            false
        } else {
            self.striding = true;
            true
        }
    }

    /// Release the stride gate.
    pub fn end_stride(&mut self) {
        self.striding = false;
    }

    /// Advance `flush_stamp` to the current stamp, logically flushing all
    /// entries inserted before this call (spec.md §4.2 `flush`).
    pub fn flush(&mut self) {
        self.flush_stamp = self.stamp;
    }

    /// Perform up to `width` incremental rehash steps (spec.md §4.1
    /// "Incremental stride"). Returns the number of buckets actually
    /// split, which is less than `width` once `max_buckets` is reached.
    pub fn stride(&mut self, width: usize) -> usize {
        let mut done = 0;
        for _ in 0..width {
            if self.stride_once() {
                done += 1;
            } else {
                break;
            }
        }
        done
    }

    fn stride_once(&mut self) -> bool {
        let (source, target) = match self.buckets.split_one() {
            Some(pair) => pair,
            None => return false,
        };

        let mut prev_source: Option<EntryHandle> = None;
        let mut cur = self.buckets.head(source);
        let mut target_head: Option<EntryHandle> = None;
        let mut target_tail: Option<EntryHandle> = None;

        while let Some(h) = cur {
            let next = self.entries.get(h).next;
            let hash = self.entries.get(h).hash;
            let new_idx = self.buckets.index(hash, self.part_bits);

            if new_idx == target {
                match prev_source {
                    Some(p) => self.entries.get_mut(p).next = next,
                    None => self.buckets.set_head(source, next),
                }
                self.entries.get_mut(h).next = None;
                match target_tail {
                    Some(t) => self.entries.get_mut(t).next = Some(h),
                    None => target_head = Some(h),
                }
                target_tail = Some(h);
            } else {
                prev_source = Some(h);
            }
            cur = next;
        }

        self.buckets.set_head(target, target_head);
        true
    }

    /// Walk the entry pool from the clock hand, collecting up to
    /// `max_victims` entries to unlink: expired entries and entries at
    /// `USED_MIN` are evicted; everything else is cooled one step (spec.md
    /// §4.1 "Clock-hand replacement"). Stops after one full sweep of the
    /// pool even if `max_victims` was not reached. Returns the victims'
    /// regions, for the caller to retire through the reclamation epoch.
    pub fn evict(&mut self, max_victims: usize, now: u32) -> Vec<ValueRegion> {
        let pool_len = self.entries.len();
        let mut victims = Vec::new();
        if pool_len == 0 {
            return victims;
        }

        let mut steps = 0;
        while steps < pool_len && victims.len() < max_victims {
            let idx = self.clock_hand;
            self.clock_hand = (self.clock_hand + 1) % pool_len;
            steps += 1;

            let handle = self.entries.handle_at(idx);
            if !self.entries.get(handle).is_live() {
                continue;
            }
            let expired = self.is_expired(self.entries.get(handle), now);
            let cold = self.entries.get(handle).state == USED_MIN;

            if expired || cold {
                let hash = self.entries.get(handle).hash;
                let bidx = self.buckets.index(hash, self.part_bits);
                if let Some(region) = self.unlink(bidx, handle) {
                    victims.push(region);
                }
            } else {
                self.entries.get_mut(handle).cool_recency();
            }
        }
        victims
    }
}
