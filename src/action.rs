//! # Action engine (C5)
//!
//! The verbs a dispatch strategy (C6) runs against a locked `Partition`:
//! `lookup`, `delete`, `create`, `resize`, `cancel`, `insert`, `update`,
//! `upsert`, `alter`, `stride`, `evict`, `flush` (spec.md §4.2). The first
//! two and the middle three (`create`/`resize`/`cancel`) are primitives;
//! `insert`/`update`/`upsert`/`alter` are the client-facing mutations built
//! from them, one per memcached storage command (`add`/`replace`/`set`/
//! `cas`). Every function here takes `&mut Partition` directly — none of
//! them touch a lock; that is the dispatch strategy's job.

use std::sync::atomic::Ordering;

use bytes::Bytes;

use crate::alloc::{ValueAllocator, ValueRegion};
use crate::entry::EntryHandle;
use crate::partition::Partition;

/// Result of running one action. Concrete rather than generic so it can
/// cross the `dyn PartitionDispatch` boundary (spec.md §4.3) without an
/// associated type on the trait.
#[derive(Debug, Clone)]
pub enum ActionOutcome {
    /// `lookup` succeeded; carries everything the executor (C10) needs to
    /// format a response without holding the partition any longer.
    Found {
        flags: u32,
        stamp: u64,
        value: Bytes,
    },
    /// `lookup`, `update`, `alter`, or `delete` found no live entry.
    NotFound,
    /// `insert`/`update`/`upsert`/`alter` stored a value.
    Stored,
    /// `insert` found a live, unexpired entry already present.
    NotStored,
    /// `alter` found a live entry whose `stamp` did not match the supplied
    /// CAS token.
    Exists,
    /// `delete` removed a live entry.
    Deleted,
    /// The value allocator rejected the request outright (value larger
    /// than the arena could ever hold).
    TooLarge,
    /// The value allocator or the entry pool is at capacity; caller should
    /// run `evict` and retry.
    OutOfMemory,
    /// `stride` result: number of buckets actually migrated.
    Stride { moved: usize },
    /// `evict` result: number of entries evicted.
    Evicted { count: usize },
    /// `flush` always succeeds.
    Flushed,
    /// `append`/`prepend` result, boxed in its own outcome type since the
    /// wire reply for this pair only ever distinguishes stored/not-stored.
    Concat(ConcatOutcome),
    /// `incr`/`decr` result, boxed in its own outcome type since success
    /// carries the post-arithmetic value rather than stored bytes.
    Numeric(NumericOutcome),
}

/// Regions unlinked as a side effect of an action (lazily expired entries
/// encountered during a chain walk, or an entry the action itself removed
/// or superseded). The caller retires these through the reclamation epoch
/// (C7) rather than freeing them inline — see the module doc comment on
/// `partition.rs`.
pub type Retired = Vec<ValueRegion>;

/// `lookup`: find a live, unexpired entry and bump its recency.
pub fn lookup(partition: &mut Partition, hash: u32, key: &[u8], now: u32) -> (ActionOutcome, Retired) {
    let idx = partition.bucket_index(hash);
    let mut retired = Vec::new();
    match partition.find(idx, hash, key, now, &mut retired) {
        Some(handle) => {
            partition.entry_mut(handle).bump_recency();
            let entry = partition.entry(handle);
            let region = entry.region.as_ref().expect("live entry always has a region");
            let outcome = ActionOutcome::Found {
                flags: entry.flags,
                stamp: entry.stamp,
                value: region.value_bytes(),
            };
            (outcome, retired)
        }
        None => (ActionOutcome::NotFound, retired),
    }
}

/// `delete`: remove a live, unexpired entry if present.
pub fn delete(partition: &mut Partition, hash: u32, key: &[u8], now: u32) -> (ActionOutcome, Retired) {
    let idx = partition.bucket_index(hash);
    let mut retired = Vec::new();
    match partition.find(idx, hash, key, now, &mut retired) {
        Some(handle) => {
            if let Some(region) = partition.unlink(idx, handle) {
                retired.push(region);
            }
            (ActionOutcome::Deleted, retired)
        }
        None => (ActionOutcome::NotFound, retired),
    }
}

/// `create`: reserve a fresh slot and region, but do not publish it into
/// any bucket chain. Used by `insert`/`upsert` when no live entry exists
/// yet, and by `alter`/`update` when replacing one requires a differently
/// sized region (see `resize`, which instead reuses an already-published
/// handle's slot).
fn create(
    partition: &mut Partition,
    allocator: &dyn ValueAllocator,
    hash: u32,
    key: &[u8],
    value: &[u8],
    flags: u32,
    exptime: u32,
) -> Result<EntryHandle, ActionOutcome> {
    let handle = partition.allocate_slot().ok_or(ActionOutcome::OutOfMemory)?;
    let region = match allocator.alloc(key, value) {
        Ok(region) => region,
        Err(_) => {
            partition.release_slot(handle);
            return Err(ActionOutcome::TooLarge);
        }
    };
    let stamp = partition.next_stamp();
    let entry = partition.entry_mut(handle);
    entry.hash = hash;
    entry.flags = flags;
    entry.stamp = stamp;
    entry.exp_time.store(exptime, Ordering::Relaxed);
    entry.ref_count.store(0, Ordering::Relaxed);
    entry.region = Some(region);
    Ok(handle)
}

/// `cancel`: release a slot reserved by `create` that will not be
/// published after all (for example, `insert` losing a race to a
/// concurrent `insert` is impossible under single-writer-per-partition
/// dispatch, but `alter`'s CAS mismatch path still needs this to unwind a
/// tentative allocation cleanly). The region is freed immediately —
/// nothing has ever published this handle, so no reader could hold a
/// `Bytes` clone of it.
fn cancel(partition: &mut Partition, allocator: &dyn ValueAllocator, handle: EntryHandle) {
    if let Some(region) = partition.entry_mut(handle).region.take() {
        allocator.free(region);
    }
    partition.release_slot(handle);
}

/// `resize`: replace an already-published entry's region in place,
/// keeping its handle (and therefore its bucket-chain position) stable.
/// Used by `update`/`upsert`/`alter` to overwrite a live entry's value,
/// and by `append`/`prepend` in the executor (C10) to grow a value. The
/// old region is returned for deferred retirement rather than freed here.
fn resize(
    partition: &mut Partition,
    allocator: &dyn ValueAllocator,
    handle: EntryHandle,
    key: &[u8],
    value: &[u8],
    flags: u32,
    exptime: u32,
) -> Result<Option<ValueRegion>, ActionOutcome> {
    let region = allocator.alloc(key, value).map_err(|_| ActionOutcome::TooLarge)?;
    let stamp = partition.next_stamp();
    let entry = partition.entry_mut(handle);
    let old = entry.region.replace(region);
    entry.flags = flags;
    entry.stamp = stamp;
    entry.exp_time.store(exptime, Ordering::Relaxed);
    Ok(old)
}

/// `insert` (memcached `add`): store only if no live entry exists.
pub fn insert(
    partition: &mut Partition,
    allocator: &dyn ValueAllocator,
    hash: u32,
    key: &[u8],
    value: &[u8],
    flags: u32,
    exptime: u32,
    now: u32,
) -> (ActionOutcome, Retired) {
    let idx = partition.bucket_index(hash);
    let mut retired = Vec::new();
    if partition.find(idx, hash, key, now, &mut retired).is_some() {
        return (ActionOutcome::NotStored, retired);
    }
    match create(partition, allocator, hash, key, value, flags, exptime) {
        Ok(handle) => {
            partition.publish(idx, handle);
            (ActionOutcome::Stored, retired)
        }
        Err(outcome) => (outcome, retired),
    }
}

/// `update` (memcached `replace`): store only if a live entry exists.
pub fn update(
    partition: &mut Partition,
    allocator: &dyn ValueAllocator,
    hash: u32,
    key: &[u8],
    value: &[u8],
    flags: u32,
    exptime: u32,
    now: u32,
) -> (ActionOutcome, Retired) {
    let idx = partition.bucket_index(hash);
    let mut retired = Vec::new();
    match partition.find(idx, hash, key, now, &mut retired) {
        Some(handle) => match resize(partition, allocator, handle, key, value, flags, exptime) {
            Ok(Some(old)) => {
                retired.push(old);
                (ActionOutcome::Stored, retired)
            }
            Ok(None) => (ActionOutcome::Stored, retired),
            Err(outcome) => (outcome, retired),
        },
        None => (ActionOutcome::NotStored, retired),
    }
}

/// `upsert` (memcached `set`): store unconditionally, replacing any live
/// entry or creating a new one.
pub fn upsert(
    partition: &mut Partition,
    allocator: &dyn ValueAllocator,
    hash: u32,
    key: &[u8],
    value: &[u8],
    flags: u32,
    exptime: u32,
    now: u32,
) -> (ActionOutcome, Retired) {
    let idx = partition.bucket_index(hash);
    let mut retired = Vec::new();
    match partition.find(idx, hash, key, now, &mut retired) {
        Some(handle) => match resize(partition, allocator, handle, key, value, flags, exptime) {
            Ok(Some(old)) => {
                retired.push(old);
                (ActionOutcome::Stored, retired)
            }
            Ok(None) => (ActionOutcome::Stored, retired),
            Err(outcome) => (outcome, retired),
        },
        None => match create(partition, allocator, hash, key, value, flags, exptime) {
            Ok(handle) => {
                partition.publish(idx, handle);
                (ActionOutcome::Stored, retired)
            }
            Err(outcome) => (outcome, retired),
        },
    }
}

/// `alter` (memcached `cas`): store only if a live entry exists and its
/// stamp matches the caller-supplied CAS token.
#[allow(clippy::too_many_arguments)]
pub fn alter(
    partition: &mut Partition,
    allocator: &dyn ValueAllocator,
    hash: u32,
    key: &[u8],
    value: &[u8],
    flags: u32,
    exptime: u32,
    cas_token: u64,
    now: u32,
) -> (ActionOutcome, Retired) {
    let idx = partition.bucket_index(hash);
    let mut retired = Vec::new();
    match partition.find(idx, hash, key, now, &mut retired) {
        Some(handle) => {
            if partition.entry(handle).stamp != cas_token {
                return (ActionOutcome::Exists, retired);
            }
            match resize(partition, allocator, handle, key, value, flags, exptime) {
                Ok(Some(old)) => {
                    retired.push(old);
                    (ActionOutcome::Stored, retired)
                }
                Ok(None) => (ActionOutcome::Stored, retired),
                Err(outcome) => (outcome, retired),
            }
        }
        None => (ActionOutcome::NotFound, retired),
    }
}

/// Outcome of `append`/`prepend`, kept separate from [`ActionOutcome`]
/// because memcached's wire reply for this pair is `STORED`/`NOT_STORED`
/// only — no `EXISTS`/`NotFound` distinction applies.
#[derive(Debug, Clone, Copy)]
pub enum ConcatOutcome {
    Stored,
    NotStored,
    TooLarge,
    OutOfMemory,
}

/// `append`/`prepend`: find a live entry, splice `fragment` onto its
/// existing value, and republish in place under the same handle. A miss is
/// `NotStored` per spec.md §4.7; no auto-vivification on either protocol.
pub fn concat(
    partition: &mut Partition,
    allocator: &dyn ValueAllocator,
    hash: u32,
    key: &[u8],
    fragment: &[u8],
    prepend: bool,
    now: u32,
) -> (ConcatOutcome, Retired) {
    let idx = partition.bucket_index(hash);
    let mut retired = Vec::new();
    let handle = match partition.find(idx, hash, key, now, &mut retired) {
        Some(handle) => handle,
        None => return (ConcatOutcome::NotStored, retired),
    };

    let entry = partition.entry(handle);
    let region = entry.region.as_ref().expect("live entry always has a region");
    let existing = region.value_bytes();
    let (prefix, suffix): (&[u8], &[u8]) = if prepend { (fragment, &existing) } else { (&existing, fragment) };

    let new_region = match allocator.alloc_concat(key, prefix, suffix) {
        Ok(region) => region,
        Err(_) => return (ConcatOutcome::TooLarge, retired),
    };
    let stamp = partition.next_stamp();
    let entry = partition.entry_mut(handle);
    let old = entry.region.replace(new_region);
    entry.stamp = stamp;

    if let Some(old) = old {
        retired.push(old);
    }
    (ConcatOutcome::Stored, retired)
}

/// Outcome of `incr`/`decr`, distinct from [`ActionOutcome`] because the
/// success case carries the post-arithmetic value rather than the stored
/// bytes (ascii replies it as a bare decimal line; binary as an 8-byte
/// integer body).
#[derive(Debug, Clone, Copy)]
pub enum NumericOutcome {
    Value(u64),
    NotFound,
    NonNumeric,
    TooLarge,
    OutOfMemory,
}

/// `incr`/`decr`: parse the current value as an unsigned decimal integer,
/// apply `delta`, and store the result back as decimal ascii text (spec.md
/// §4.7 — memcached's numeric counters are textual, not binary, even on the
/// binary protocol wire). `decrement` selects subtraction, clamped at zero
/// rather than underflowing (spec.md §8). When the key is missing,
/// `auto_create` (binary protocol only) supplies an initial value and
/// expiration to vivify it instead of failing.
pub fn incr_decr(
    partition: &mut Partition,
    allocator: &dyn ValueAllocator,
    hash: u32,
    key: &[u8],
    delta: u64,
    decrement: bool,
    now: u32,
    auto_create: Option<(u64, i64)>,
) -> (NumericOutcome, Retired) {
    let idx = partition.bucket_index(hash);
    let mut retired = Vec::new();
    let handle = match partition.find(idx, hash, key, now, &mut retired) {
        Some(handle) => handle,
        None => {
            let (initial, exptime) = match auto_create {
                Some(pair) => pair,
                None => return (NumericOutcome::NotFound, retired),
            };
            let value = initial.to_string().into_bytes();
            return match create(partition, allocator, hash, key, &value, 0, exptime as u32) {
                Ok(handle) => {
                    partition.publish(idx, handle);
                    (NumericOutcome::Value(initial), retired)
                }
                Err(ActionOutcome::TooLarge) => (NumericOutcome::TooLarge, retired),
                Err(_) => (NumericOutcome::OutOfMemory, retired),
            };
        }
    };

    let entry = partition.entry(handle);
    let flags = entry.flags;
    let exptime = entry.exp_time.load(Ordering::Relaxed);
    let region = entry.region.as_ref().expect("live entry always has a region");
    let current = match std::str::from_utf8(&region.value_bytes())
        .ok()
        .and_then(|s| s.trim_end().parse::<u64>().ok())
    {
        Some(n) => n,
        None => return (NumericOutcome::NonNumeric, retired),
    };

    let next = if decrement {
        current.saturating_sub(delta)
    } else {
        current.wrapping_add(delta)
    };
    let value = next.to_string().into_bytes();

    match resize(partition, allocator, handle, key, &value, flags, exptime) {
        Ok(Some(old)) => {
            retired.push(old);
            (NumericOutcome::Value(next), retired)
        }
        Ok(None) => (NumericOutcome::Value(next), retired),
        Err(ActionOutcome::TooLarge) => (NumericOutcome::TooLarge, retired),
        Err(_) => (NumericOutcome::OutOfMemory, retired),
    }
}

/// `touch`: update a live entry's expiration without touching its value.
pub fn touch(partition: &mut Partition, hash: u32, key: &[u8], exptime: u32, now: u32) -> (ActionOutcome, Retired) {
    let idx = partition.bucket_index(hash);
    let mut retired = Vec::new();
    match partition.find(idx, hash, key, now, &mut retired) {
        Some(handle) => {
            partition.entry_mut(handle).exp_time.store(exptime, Ordering::Relaxed);
            (ActionOutcome::Stored, retired)
        }
        None => (ActionOutcome::NotFound, retired),
    }
}

/// Tentatively reserve a slot for a caller that has not yet decided
/// whether to publish it (the executor's `append`/`prepend`/`incr`/`decr`
/// paths build a new value before knowing if the key even exists). Exposed
/// so those callers can share `create`/`cancel` without duplicating the
/// allocator-exhaustion handling.
pub fn create_detached(
    partition: &mut Partition,
    allocator: &dyn ValueAllocator,
    hash: u32,
    key: &[u8],
    value: &[u8],
    flags: u32,
    exptime: u32,
) -> Result<EntryHandle, ActionOutcome> {
    create(partition, allocator, hash, key, value, flags, exptime)
}

/// Publish a handle reserved via [`create_detached`].
pub fn publish_detached(partition: &mut Partition, hash: u32, handle: EntryHandle) {
    let idx = partition.bucket_index(hash);
    partition.publish(idx, handle);
}

/// Abandon a handle reserved via [`create_detached`] without publishing
/// it.
pub fn cancel_detached(partition: &mut Partition, allocator: &dyn ValueAllocator, handle: EntryHandle) {
    cancel(partition, allocator, handle);
}

/// Replace an already-published entry's value in place, for
/// `append`/`prepend`/`incr`/`decr` in the executor.
pub fn resize_published(
    partition: &mut Partition,
    allocator: &dyn ValueAllocator,
    handle: EntryHandle,
    key: &[u8],
    value: &[u8],
    flags: u32,
    exptime: u32,
) -> Result<Option<ValueRegion>, ActionOutcome> {
    resize(partition, allocator, handle, key, value, flags, exptime)
}

/// `stride`: run up to `STRIDE_WIDTH` incremental rehash steps.
pub fn stride(partition: &mut Partition, width: usize) -> ActionOutcome {
    let moved = partition.stride(width);
    ActionOutcome::Stride { moved }
}

/// `evict`: run one clock-hand sweep, collecting up to `max_victims`
/// entries.
pub fn evict(partition: &mut Partition, max_victims: usize, now: u32) -> (ActionOutcome, Retired) {
    let retired = partition.evict(max_victims, now);
    let count = retired.len();
    (ActionOutcome::Evicted { count }, retired)
}

/// `flush`: logically flush every entry inserted so far.
pub fn flush(partition: &mut Partition) -> ActionOutcome {
    partition.flush();
    ActionOutcome::Flushed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::ArenaAllocator;
    use crate::partition::Partition;

    fn new_partition() -> (Partition, ArenaAllocator) {
        (Partition::new(0, 0, 16, 256, 1024, 1 << 20), ArenaAllocator::new(1 << 20))
    }

    #[test]
    fn insert_then_lookup_round_trips() {
        let (mut p, alloc) = new_partition();
        let (outcome, _) = insert(&mut p, &alloc, 1, b"k", b"v", 0, 0, 0);
        assert!(matches!(outcome, ActionOutcome::Stored));

        let (outcome, _) = lookup(&mut p, 1, b"k", 0);
        match outcome {
            ActionOutcome::Found { value, .. } => assert_eq!(&value[..], b"v"),
            other => panic!("expected Found, got {other:?}"),
        }
    }

    #[test]
    fn insert_twice_is_not_stored() {
        let (mut p, alloc) = new_partition();
        insert(&mut p, &alloc, 1, b"k", b"v1", 0, 0, 0);
        let (outcome, _) = insert(&mut p, &alloc, 1, b"k", b"v2", 0, 0, 0);
        assert!(matches!(outcome, ActionOutcome::NotStored));
    }

    #[test]
    fn update_missing_key_is_not_stored() {
        let (mut p, alloc) = new_partition();
        let (outcome, _) = update(&mut p, &alloc, 1, b"k", b"v", 0, 0, 0);
        assert!(matches!(outcome, ActionOutcome::NotStored));
    }

    #[test]
    fn upsert_creates_then_replaces() {
        let (mut p, alloc) = new_partition();
        let (outcome, _) = upsert(&mut p, &alloc, 1, b"k", b"v1", 0, 0, 0);
        assert!(matches!(outcome, ActionOutcome::Stored));
        let (outcome, retired) = upsert(&mut p, &alloc, 1, b"k", b"v2-longer", 0, 0, 0);
        assert!(matches!(outcome, ActionOutcome::Stored));
        assert_eq!(retired.len(), 1);

        let (outcome, _) = lookup(&mut p, 1, b"k", 0);
        match outcome {
            ActionOutcome::Found { value, .. } => assert_eq!(&value[..], b"v2-longer"),
            other => panic!("expected Found, got {other:?}"),
        }
    }

    #[test]
    fn alter_requires_matching_stamp() {
        let (mut p, alloc) = new_partition();
        upsert(&mut p, &alloc, 1, b"k", b"v1", 0, 0, 0);
        let (outcome, _) = lookup(&mut p, 1, b"k", 0);
        let stamp = match outcome {
            ActionOutcome::Found { stamp, .. } => stamp,
            other => panic!("expected Found, got {other:?}"),
        };

        let (outcome, _) = alter(&mut p, &alloc, 1, b"k", b"v2", 0, 0, stamp.wrapping_add(1), 0);
        assert!(matches!(outcome, ActionOutcome::Exists));

        let (outcome, _) = alter(&mut p, &alloc, 1, b"k", b"v2", 0, 0, stamp, 0);
        assert!(matches!(outcome, ActionOutcome::Stored));
    }

    #[test]
    fn delete_removes_live_entry() {
        let (mut p, alloc) = new_partition();
        insert(&mut p, &alloc, 1, b"k", b"v", 0, 0, 0);
        let (outcome, retired) = delete(&mut p, 1, b"k", 0);
        assert!(matches!(outcome, ActionOutcome::Deleted));
        assert_eq!(retired.len(), 1);

        let (outcome, _) = lookup(&mut p, 1, b"k", 0);
        assert!(matches!(outcome, ActionOutcome::NotFound));
    }

    #[test]
    fn flush_then_lookup_is_not_found() {
        let (mut p, alloc) = new_partition();
        insert(&mut p, &alloc, 1, b"k", b"v", 0, 0, 0);
        flush(&mut p);
        let (outcome, _) = lookup(&mut p, 1, b"k", 0);
        assert!(matches!(outcome, ActionOutcome::NotFound));
    }

    #[test]
    fn append_splices_onto_the_existing_value() {
        let (mut p, alloc) = new_partition();
        insert(&mut p, &alloc, 1, b"k", b"hello", 0, 0, 0);
        let (outcome, _) = concat(&mut p, &alloc, 1, b"k", b" world", false, 0);
        assert!(matches!(outcome, ConcatOutcome::Stored));
        let (outcome, _) = lookup(&mut p, 1, b"k", 0);
        match outcome {
            ActionOutcome::Found { value, .. } => assert_eq!(&value[..], b"hello world"),
            other => panic!("expected Found, got {other:?}"),
        }
    }

    #[test]
    fn prepend_on_a_missing_key_is_not_stored() {
        let (mut p, alloc) = new_partition();
        let (outcome, _) = concat(&mut p, &alloc, 1, b"k", b"x", true, 0);
        assert!(matches!(outcome, ConcatOutcome::NotStored));
    }

    #[test]
    fn incr_adds_delta_to_a_numeric_value() {
        let (mut p, alloc) = new_partition();
        insert(&mut p, &alloc, 1, b"k", b"10", 0, 0, 0);
        let (outcome, _) = incr_decr(&mut p, &alloc, 1, b"k", 5, false, 0, None);
        assert!(matches!(outcome, NumericOutcome::Value(15)));
    }

    #[test]
    fn decr_clamps_at_zero_instead_of_underflowing() {
        let (mut p, alloc) = new_partition();
        insert(&mut p, &alloc, 1, b"k", b"3", 0, 0, 0);
        let (outcome, _) = incr_decr(&mut p, &alloc, 1, b"k", 10, true, 0, None);
        assert!(matches!(outcome, NumericOutcome::Value(0)));
    }

    #[test]
    fn incr_on_non_numeric_value_is_rejected() {
        let (mut p, alloc) = new_partition();
        insert(&mut p, &alloc, 1, b"k", b"not-a-number", 0, 0, 0);
        let (outcome, _) = incr_decr(&mut p, &alloc, 1, b"k", 1, false, 0, None);
        assert!(matches!(outcome, NumericOutcome::NonNumeric));
    }

    #[test]
    fn incr_on_a_missing_key_can_auto_vivify() {
        let (mut p, alloc) = new_partition();
        let (outcome, _) = incr_decr(&mut p, &alloc, 1, b"k", 5, false, 0, Some((42, 0)));
        assert!(matches!(outcome, NumericOutcome::Value(42)));
        let (outcome, _) = lookup(&mut p, 1, b"k", 0);
        match outcome {
            ActionOutcome::Found { value, .. } => assert_eq!(&value[..], b"42"),
            other => panic!("expected Found, got {other:?}"),
        }
    }

    #[test]
    fn touch_updates_expiration_without_touching_value() {
        let (mut p, alloc) = new_partition();
        insert(&mut p, &alloc, 1, b"k", b"v", 0, 0, 0);
        let (outcome, _) = touch(&mut p, 1, b"k", 100, 0);
        assert!(matches!(outcome, ActionOutcome::Stored));
        let (outcome, _) = lookup(&mut p, 1, b"k", 50);
        assert!(matches!(outcome, ActionOutcome::Found { .. }));
    }
}
