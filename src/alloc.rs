//! # Value allocator (C3)
//!
//! Spec.md treats the memory arena backing value payloads as an external
//! collaborator, specified only by the operations the core invokes on it:
//! `alloc`, `realloc`, `free`. This module supplies the one concrete,
//! process-local implementation this crate ships, behind a trait so a real
//! slab/mmap arena could be substituted without touching the action engine.
//!
//! The default implementation is deliberately simple: it defers to the
//! system allocator for the actual bytes and only adds the bookkeeping the
//! core depends on — a running byte total checked against a configured cap,
//! so `volume` thresholds (spec.md §4.1) can be enforced and allocator
//! exhaustion (spec.md §7, fatal) can be raised deterministically instead of
//! aborting the process via OOM.

use crate::error::{StoreError, StoreResult};
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};

/// A contiguous byte region holding `key` immediately followed by `value`,
/// as required by spec.md §3's `Entry::data` layout.
///
/// Backed by `Bytes` rather than an owned `Box<[u8]>` so that a lookup can
/// hand a caller a cheap, reference-counted clone of the value that
/// outlives the partition's critical section — the response can then be
/// written to a socket without holding the partition lock for the duration
/// of the I/O, which is the whole reason spec.md's epoch scheme (C7) exists:
/// the entry's *slot* may be unlinked and its metadata reclaimed while a
/// `Bytes` clone taken from it is still alive and being streamed out.
#[derive(Debug, Clone)]
pub struct ValueRegion {
    bytes: Bytes,
    key_len: u16,
}

impl ValueRegion {
    fn new(key: &[u8], value: &[u8]) -> Self {
        let mut buf = Vec::with_capacity(key.len() + value.len());
        buf.extend_from_slice(key);
        buf.extend_from_slice(value);
        ValueRegion {
            bytes: Bytes::from(buf),
            key_len: key.len() as u16,
        }
    }

    /// The key portion of the region.
    pub fn key(&self) -> &[u8] {
        &self.bytes[..self.key_len as usize]
    }

    /// The value portion of the region.
    pub fn value(&self) -> &[u8] {
        &self.bytes[self.key_len as usize..]
    }

    /// A cheap, reference-counted clone of the value portion, safe to hand
    /// to a caller that will read it after the partition's critical section
    /// has ended (see the type-level doc comment).
    pub fn value_bytes(&self) -> Bytes {
        self.bytes.slice(self.key_len as usize..)
    }

    /// Total bytes held by this region (key + value).
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Length of the value portion alone.
    pub fn value_len(&self) -> u32 {
        (self.bytes.len() - self.key_len as usize) as u32
    }

    /// `true` if this region holds no bytes at all.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Operations the action engine (C5) performs against the value arena.
pub trait ValueAllocator: Send + Sync {
    /// Allocate a region holding `key` followed by `value`.
    fn alloc(&self, key: &[u8], value: &[u8]) -> StoreResult<ValueRegion>;

    /// Allocate a region holding `key` followed by a value built by
    /// concatenating `prefix` and `suffix` (used by `append`/`prepend`).
    fn alloc_concat(&self, key: &[u8], prefix: &[u8], suffix: &[u8]) -> StoreResult<ValueRegion>;

    /// Release a region's bytes back to the arena, updating the running
    /// total. Called only after the epoch scheme (C7) has determined no
    /// reader can still observe the entry that owned this region.
    fn free(&self, region: ValueRegion);

    /// Bytes currently attributed to live regions.
    fn in_use(&self) -> u64;

    /// Configured cap, for diagnostics.
    fn capacity(&self) -> u64;
}

/// The default value allocator: system-allocator backed, with a running
/// byte total checked against `capacity` on every `alloc`/`alloc_concat`.
pub struct ArenaAllocator {
    capacity: u64,
    in_use: AtomicU64,
}

impl ArenaAllocator {
    /// Build a new arena capped at `capacity` bytes.
    pub fn new(capacity: u64) -> Self {
        ArenaAllocator {
            capacity,
            in_use: AtomicU64::new(0),
        }
    }

    fn reserve(&self, requested: usize) -> StoreResult<()> {
        let requested_u64 = requested as u64;
        loop {
            let current = self.in_use.load(Ordering::Relaxed);
            let next = current.saturating_add(requested_u64);
            if next > self.capacity {
                return Err(StoreError::AllocatorExhausted {
                    requested,
                    available: self.capacity.saturating_sub(current) as usize,
                });
            }
            if self
                .in_use
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Ok(());
            }
        }
    }
}

impl ValueAllocator for ArenaAllocator {
    fn alloc(&self, key: &[u8], value: &[u8]) -> StoreResult<ValueRegion> {
        self.reserve(key.len() + value.len())?;
        Ok(ValueRegion::new(key, value))
    }

    fn alloc_concat(&self, key: &[u8], prefix: &[u8], suffix: &[u8]) -> StoreResult<ValueRegion> {
        self.reserve(key.len() + prefix.len() + suffix.len())?;
        let mut value = Vec::with_capacity(prefix.len() + suffix.len());
        value.extend_from_slice(prefix);
        value.extend_from_slice(suffix);
        Ok(ValueRegion::new(key, &value))
    }

    fn free(&self, region: ValueRegion) {
        let len = region.len() as u64;
        self.in_use.fetch_sub(len, Ordering::AcqRel);
        drop(region);
    }

    fn in_use(&self) -> u64 {
        self.in_use.load(Ordering::Relaxed)
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_tracks_in_use() {
        let arena = ArenaAllocator::new(1024);
        let region = arena.alloc(b"k", b"value").unwrap();
        assert_eq!(arena.in_use(), 6);
        assert_eq!(region.key(), b"k");
        assert_eq!(region.value(), b"value");
        arena.free(region);
        assert_eq!(arena.in_use(), 0);
    }

    #[test]
    fn alloc_exhaustion_is_rejected() {
        let arena = ArenaAllocator::new(4);
        assert!(arena.alloc(b"toolongkey", b"value").is_err());
        assert_eq!(arena.in_use(), 0);
    }

    #[test]
    fn alloc_concat_builds_value() {
        let arena = ArenaAllocator::new(1024);
        let region = arena.alloc_concat(b"k", b"hello", b"world").unwrap();
        assert_eq!(region.value(), b"helloworld");
    }
}
