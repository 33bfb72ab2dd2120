//! # Entry pool (C1)
//!
//! A fixed-address, monotonically-growing arena of entry slots, addressed by
//! stable handles (spec.md §9: "model the pool as a growable region of
//! stable indices and handles; do not move entries"). Slots are reused via
//! a free list; the backing `Vec` only ever grows.

use crate::alloc::ValueRegion;

/// Entry is on the partition free list, not reachable from any bucket chain.
pub const STATE_FREE: u8 = 0;
/// Transient: between unlink and free, or between allocation and insertion.
pub const STATE_NOT_USED: u8 = 1;
/// Coldest live recency level.
pub const USED_MIN: u8 = 2;
/// Hottest live recency level.
pub const USED_MAX: u8 = 6;

/// A stable handle into an `EntryPool`. Indices are never reused while the
/// entry they name is reachable; once freed, a handle may be recycled by a
/// later `allocate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryHandle(pub u32);

impl EntryHandle {
    fn idx(self) -> usize {
        self.0 as usize
    }
}

/// One storage slot. When `state == STATE_FREE`, `next` threads the
/// partition free list; otherwise it is the singly-linked hash-chain
/// pointer (spec.md §9: no back pointers, previous-link walk on delete).
pub struct Entry {
    /// Full 32-bit hash of the key.
    pub hash: u32,
    /// Opaque client flags.
    pub flags: u32,
    /// Absolute expiration in whole seconds; 0 = never. Mutated in place by
    /// `touch`, which spec.md §4.7 explicitly permits to race benignly.
    pub exp_time: std::sync::atomic::AtomicU32,
    /// Insertion stamp; unique and monotonic per partition, used as the CAS
    /// token.
    pub stamp: u64,
    /// Outstanding readers. Atomic because a reader may release its
    /// reference from a thread outside the partition's synchronized
    /// section.
    pub ref_count: std::sync::atomic::AtomicU16,
    /// Liveness/recency state: `STATE_FREE`, `STATE_NOT_USED`, or a value in
    /// `USED_MIN..=USED_MAX`.
    pub state: u8,
    /// Next pointer: hash-chain link when used, free-list link when free.
    pub next: Option<EntryHandle>,
    /// Key+value bytes. `None` only for a not-yet-filled slot.
    pub region: Option<ValueRegion>,
}

impl Entry {
    fn vacant() -> Self {
        Entry {
            hash: 0,
            flags: 0,
            exp_time: std::sync::atomic::AtomicU32::new(0),
            stamp: 0,
            ref_count: std::sync::atomic::AtomicU16::new(0),
            state: STATE_FREE,
            next: None,
            region: None,
        }
    }

    /// Key bytes, valid only while `region` is `Some`.
    pub fn key(&self) -> &[u8] {
        self.region.as_ref().map(|r| r.key()).unwrap_or(&[])
    }

    /// Value bytes, valid only while `region` is `Some`.
    pub fn value(&self) -> &[u8] {
        self.region.as_ref().map(|r| r.value()).unwrap_or(&[])
    }

    /// Key length in bytes.
    pub fn key_len(&self) -> u16 {
        self.key().len() as u16
    }

    /// Value length in bytes.
    pub fn value_len(&self) -> u32 {
        self.region.as_ref().map(|r| r.value_len()).unwrap_or(0)
    }

    /// `sizeof(Entry) + key_len + value_len`, used for per-partition volume
    /// accounting (spec.md §4.1 "Thresholds").
    pub fn entry_size(&self) -> u64 {
        std::mem::size_of::<Entry>() as u64 + self.region.as_ref().map(|r| r.len() as u64).unwrap_or(0)
    }

    /// `true` iff the entry is currently reachable from a bucket chain.
    pub fn is_live(&self) -> bool {
        (USED_MIN..=USED_MAX).contains(&self.state)
    }

    /// Bump recency on a successful lookup, saturating at `USED_MAX`
    /// (spec.md §4.1 clock-hand replacement).
    pub fn bump_recency(&mut self) {
        if self.state < USED_MAX {
            self.state += 1;
        }
    }

    /// Cool recency by one step during an eviction sweep, floored at
    /// `USED_MIN`.
    pub fn cool_recency(&mut self) {
        if self.state > USED_MIN {
            self.state -= 1;
        }
    }

    /// `exp_time != 0 && exp_time <= now`, per spec.md §4.1. Does not check
    /// `flush_stamp`; callers compare `stamp` separately.
    pub fn is_time_expired(&self, now_seconds: u32) -> bool {
        let exp = self.exp_time.load(std::sync::atomic::Ordering::Relaxed);
        exp != 0 && exp <= now_seconds
    }
}

/// The per-partition entry pool: a growable arena of stable-address slots
/// plus a free list of reclaimed slots (spec.md §3 "Entry slot" lifecycle).
pub struct EntryPool {
    slots: Vec<Entry>,
    free_head: Option<EntryHandle>,
    max_capacity: usize,
}

impl EntryPool {
    /// Build an empty pool capped at `max_capacity` slots.
    pub fn new(max_capacity: usize) -> Self {
        EntryPool {
            slots: Vec::new(),
            free_head: None,
            max_capacity,
        }
    }

    /// Number of committed slots (live + free-listed).
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// `true` if no slots have been committed yet.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Configured ceiling on committed slots.
    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    /// Reserve a slot: pop the free list if non-empty, else commit a new
    /// slot if the pool has headroom. Returns `None` when the pool is at
    /// capacity and the free list is empty (caller must evict first).
    pub fn allocate(&mut self) -> Option<EntryHandle> {
        if let Some(handle) = self.free_head {
            let next_free = self.slots[handle.idx()].next;
            self.free_head = next_free;
            self.slots[handle.idx()].state = STATE_NOT_USED;
            self.slots[handle.idx()].next = None;
            return Some(handle);
        }
        if self.slots.len() >= self.max_capacity {
            return None;
        }
        let handle = EntryHandle(self.slots.len() as u32);
        let mut e = Entry::vacant();
        e.state = STATE_NOT_USED;
        self.slots.push(e);
        Some(handle)
    }

    /// Push a vacated slot back onto the free list. Caller must have
    /// already released the slot's value region and set its state.
    pub fn release(&mut self, handle: EntryHandle) {
        let slot = &mut self.slots[handle.idx()];
        debug_assert!(slot.region.is_none());
        slot.state = STATE_FREE;
        slot.next = self.free_head;
        self.free_head = Some(handle);
    }

    /// Borrow a slot.
    pub fn get(&self, handle: EntryHandle) -> &Entry {
        &self.slots[handle.idx()]
    }

    /// Mutably borrow a slot.
    pub fn get_mut(&mut self, handle: EntryHandle) -> &mut Entry {
        &mut self.slots[handle.idx()]
    }

    /// Iterate all committed slot handles in index order, used by the
    /// clock-hand sweep (spec.md §4.1).
    pub fn handle_at(&self, idx: usize) -> EntryHandle {
        EntryHandle(idx as u32)
    }
}
