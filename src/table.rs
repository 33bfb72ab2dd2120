//! # Table (the top-level cache context)
//!
//! Owns every partition behind its configured [`PartitionDispatch`], the
//! shared [`ValueAllocator`], the [`ExpirationClock`], and the
//! [`EpochManager`] used to retire superseded value regions. Selecting a
//! partition for a key is the one piece of routing logic that sits above
//! the dispatch layer: `partition_index = hash & (nparts - 1)` (spec.md
//! §4.1), with the same hash then shifted by `log2(nparts)` bits before
//! a partition indexes its own buckets.

use std::sync::Arc;

use crate::action::{self, ActionOutcome};
use crate::alloc::{ValueAllocator, ValueRegion};
use crate::clock::ExpirationClock;
use crate::config::{Config, DispatchStrategy};
use crate::dispatch::combining::CombiningDispatch;
use crate::dispatch::delegation::DelegationDispatch;
use crate::dispatch::locking::LockingDispatch;
use crate::dispatch::PartitionDispatch;
use crate::epoch::{EpochManager, WorkerId};
use crate::partition::Partition;

const FNV_OFFSET: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a, used to hash keys into the partition/bucket space.
/// Deterministic and allocation-free, which matters more here than
/// collision resistance against adversarial keys (spec.md §9 Non-goals).
pub fn hash_key(key: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET;
    for &byte in key {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// The whole cache: partitions, allocator, clock, and reclamation epoch.
pub struct Table {
    partitions: Vec<Arc<dyn PartitionDispatch>>,
    part_mask: u32,
    allocator: Arc<dyn ValueAllocator>,
    clock: Arc<ExpirationClock>,
    epoch: Arc<EpochManager>,
}

impl Table {
    /// Build a table from a validated [`Config`], spawning owner tasks for
    /// any partition using the delegation strategy.
    pub fn new(config: &Config, allocator: Arc<dyn ValueAllocator>, worker_count: usize) -> Self {
        let nparts = config.nparts as usize;
        let part_bits = nparts.trailing_zeros();
        let volume_cap = config.volume_per_partition();
        let initial_buckets = 16;
        let max_buckets = 1 << 20;
        let max_entries = usize::MAX / 2;

        let mut partitions: Vec<Arc<dyn PartitionDispatch>> = Vec::with_capacity(nparts);
        for id in 0..nparts {
            let partition = Partition::new(id, part_bits, initial_buckets, max_buckets, max_entries, volume_cap);
            let dispatch: Arc<dyn PartitionDispatch> = match config.dispatch_strategy {
                DispatchStrategy::Locking => Arc::new(LockingDispatch::new(id, partition)),
                DispatchStrategy::Delegation => Arc::new(DelegationDispatch::spawn(id, partition)),
                DispatchStrategy::Combining => Arc::new(CombiningDispatch::new(id, partition)),
            };
            partitions.push(dispatch);
        }

        Table {
            partitions,
            part_mask: (nparts - 1) as u32,
            allocator,
            clock: Arc::new(ExpirationClock::new()),
            epoch: Arc::new(EpochManager::new(worker_count)),
        }
    }

    /// Number of partitions in this table.
    pub fn nparts(&self) -> usize {
        self.partitions.len()
    }

    /// Shared expiration clock.
    pub fn clock(&self) -> &Arc<ExpirationClock> {
        &self.clock
    }

    /// Shared reclamation epoch.
    pub fn epoch(&self) -> &Arc<EpochManager> {
        &self.epoch
    }

    /// Shared value allocator.
    pub fn allocator(&self) -> &Arc<dyn ValueAllocator> {
        &self.allocator
    }

    fn partition_for(&self, hash: u32) -> &Arc<dyn PartitionDispatch> {
        let idx = (hash & self.part_mask) as usize;
        &self.partitions[idx]
    }

    /// Run `lookup` for `key`, retiring any lazily-expired regions
    /// encountered along the way through `worker`'s epoch batch.
    pub async fn lookup(&self, worker: WorkerId, key: &[u8]) -> ActionOutcome {
        let hash = hash_key(key);
        let now = self.clock.now();
        let key = key.to_vec();
        let allocator = self.allocator.clone();
        let epoch = self.epoch.clone();

        epoch.begin_batch(worker);
        let outcome = self
            .partition_for(hash)
            .run(Box::new(move |p| {
                let (outcome, retired) = action::lookup(p, hash, &key, now);
                retire_all(&epoch, worker, &allocator, retired);
                outcome
            }))
            .await;
        self.epoch.try_advance(worker);
        self.epoch.end_batch(worker);
        outcome
    }

    /// Run `delete` for `key`.
    pub async fn delete(&self, worker: WorkerId, key: &[u8]) -> ActionOutcome {
        self.mutate(worker, key, move |p, hash, key, now, _allocator| {
            action::delete(p, hash, key, now)
        })
        .await
    }

    /// Run `insert` (`add`) for `key`.
    pub async fn insert(&self, worker: WorkerId, key: &[u8], value: Vec<u8>, flags: u32, exptime: u32) -> ActionOutcome {
        self.mutate(worker, key, move |p, hash, key, now, allocator| {
            action::insert(p, allocator, hash, key, &value, flags, exptime, now)
        })
        .await
    }

    /// Run `update` (`replace`) for `key`.
    pub async fn update(&self, worker: WorkerId, key: &[u8], value: Vec<u8>, flags: u32, exptime: u32) -> ActionOutcome {
        self.mutate(worker, key, move |p, hash, key, now, allocator| {
            action::update(p, allocator, hash, key, &value, flags, exptime, now)
        })
        .await
    }

    /// Run `upsert` (`set`) for `key`.
    pub async fn upsert(&self, worker: WorkerId, key: &[u8], value: Vec<u8>, flags: u32, exptime: u32) -> ActionOutcome {
        self.mutate(worker, key, move |p, hash, key, now, allocator| {
            action::upsert(p, allocator, hash, key, &value, flags, exptime, now)
        })
        .await
    }

    /// Run `alter` (`cas`) for `key`.
    #[allow(clippy::too_many_arguments)]
    pub async fn alter(
        &self,
        worker: WorkerId,
        key: &[u8],
        value: Vec<u8>,
        flags: u32,
        exptime: u32,
        cas_token: u64,
    ) -> ActionOutcome {
        self.mutate(worker, key, move |p, hash, key, now, allocator| {
            action::alter(p, allocator, hash, key, &value, flags, exptime, cas_token, now)
        })
        .await
    }

    /// Run `append`/`prepend` for `key`.
    pub async fn concat(&self, worker: WorkerId, key: &[u8], fragment: Vec<u8>, prepend: bool) -> action::ConcatOutcome {
        let hash = hash_key(key);
        let now = self.clock.now();
        let key_owned = key.to_vec();
        let allocator = self.allocator.clone();
        let epoch = self.epoch.clone();

        epoch.begin_batch(worker);
        let outcome = self
            .partition_for(hash)
            .run(Box::new(move |p| {
                let (outcome, retired) = action::concat(p, allocator.as_ref(), hash, &key_owned, &fragment, prepend, now);
                retire_all(&epoch, worker, &allocator, retired);
                ActionOutcome::Concat(outcome)
            }))
            .await;
        self.epoch.try_advance(worker);
        self.epoch.end_batch(worker);
        match outcome {
            ActionOutcome::Concat(outcome) => outcome,
            other => unreachable!("concat job always returns ActionOutcome::Concat, got {other:?}"),
        }
    }

    /// Run `incr`/`decr` for `key`.
    pub async fn incr_decr(
        &self,
        worker: WorkerId,
        key: &[u8],
        delta: u64,
        decrement: bool,
        auto_create: Option<(u64, i64)>,
    ) -> action::NumericOutcome {
        let hash = hash_key(key);
        let now = self.clock.now();
        let key_owned = key.to_vec();
        let allocator = self.allocator.clone();
        let epoch = self.epoch.clone();

        epoch.begin_batch(worker);
        let outcome = self
            .partition_for(hash)
            .run(Box::new(move |p| {
                let (outcome, retired) =
                    action::incr_decr(p, allocator.as_ref(), hash, &key_owned, delta, decrement, now, auto_create);
                retire_all(&epoch, worker, &allocator, retired);
                ActionOutcome::Numeric(outcome)
            }))
            .await;
        self.epoch.try_advance(worker);
        self.epoch.end_batch(worker);
        match outcome {
            ActionOutcome::Numeric(outcome) => outcome,
            other => unreachable!("incr_decr job always returns ActionOutcome::Numeric, got {other:?}"),
        }
    }

    /// Run `touch` for `key`.
    pub async fn touch(&self, worker: WorkerId, key: &[u8], exptime: u32) -> ActionOutcome {
        let hash = hash_key(key);
        let now = self.clock.now();
        let key_owned = key.to_vec();
        let epoch = self.epoch.clone();

        epoch.begin_batch(worker);
        let outcome = self
            .partition_for(hash)
            .run(Box::new(move |p| action::touch(p, hash, &key_owned, exptime, now)))
            .await;
        self.epoch.try_advance(worker);
        self.epoch.end_batch(worker);
        outcome
    }

    /// Run `flush` against every partition.
    pub async fn flush(&self, worker: WorkerId) {
        for partition in &self.partitions {
            partition.run(Box::new(|p| action::flush(p))).await;
        }
        let _ = worker;
    }

    /// Run one `stride` step against partition `idx`, if it needs one.
    pub async fn maybe_stride(&self, idx: usize, width: usize) -> ActionOutcome {
        self.partitions[idx]
            .run(Box::new(move |p| {
                if p.needs_stride() {
                    action::stride(p, width)
                } else {
                    ActionOutcome::Stride { moved: 0 }
                }
            }))
            .await
    }

    /// Run one `evict` sweep against partition `idx`, if it needs one.
    pub async fn maybe_evict(&self, worker: WorkerId, idx: usize, max_victims: usize) -> ActionOutcome {
        let now = self.clock.now();
        let allocator = self.allocator.clone();
        let epoch = self.epoch.clone();

        epoch.begin_batch(worker);
        let outcome = self.partitions[idx]
            .run(Box::new(move |p| {
                if !p.needs_eviction() {
                    return ActionOutcome::Evicted { count: 0 };
                }
                let (outcome, retired) = action::evict(p, max_victims, now);
                retire_all(&epoch, worker, &allocator, retired);
                outcome
            }))
            .await;
        self.epoch.try_advance(worker);
        self.epoch.end_batch(worker);
        outcome
    }

    async fn mutate<F>(&self, worker: WorkerId, key: &[u8], build: F) -> ActionOutcome
    where
        F: FnOnce(&mut Partition, u32, &[u8], u32, &dyn ValueAllocator) -> (ActionOutcome, Vec<ValueRegion>)
            + Send
            + 'static,
    {
        let hash = hash_key(key);
        let now = self.clock.now();
        let key = key.to_vec();
        let allocator = self.allocator.clone();
        let epoch = self.epoch.clone();

        epoch.begin_batch(worker);
        let outcome = self
            .partition_for(hash)
            .run(Box::new(move |p| {
                let (outcome, retired) = build(p, hash, &key, now, allocator.as_ref());
                retire_all(&epoch, worker, &allocator, retired);
                outcome
            }))
            .await;
        self.epoch.try_advance(worker);
        self.epoch.end_batch(worker);
        outcome
    }
}

fn retire_all(epoch: &Arc<EpochManager>, worker: WorkerId, allocator: &Arc<dyn ValueAllocator>, regions: Vec<ValueRegion>) {
    for region in regions {
        let allocator = allocator.clone();
        epoch.retire(worker, Box::new(move || allocator.free(region)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::ArenaAllocator;
    use crate::config::Config;

    fn test_table() -> Table {
        let config = Config {
            nparts: 4,
            ..Config::default()
        }
        .normalize()
        .unwrap();
        let allocator: Arc<dyn ValueAllocator> = Arc::new(ArenaAllocator::new(1 << 20));
        Table::new(&config, allocator, 1)
    }

    #[tokio::test]
    async fn insert_then_lookup_round_trips_through_the_table() {
        let table = test_table();
        let worker = table.epoch().worker_id(0);

        let outcome = table.insert(worker, b"k", b"v".to_vec(), 0, 0).await;
        assert!(matches!(outcome, ActionOutcome::Stored));

        let outcome = table.lookup(worker, b"k").await;
        match outcome {
            ActionOutcome::Found { value, .. } => assert_eq!(&value[..], b"v"),
            other => panic!("expected Found, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn flush_hides_every_partition() {
        let table = test_table();
        let worker = table.epoch().worker_id(0);

        for i in 0..16u32 {
            let key = format!("k{i}").into_bytes();
            table.insert(worker, &key, b"v".to_vec(), 0, 0).await;
        }
        table.flush(worker).await;

        for i in 0..16u32 {
            let key = format!("k{i}").into_bytes();
            let outcome = table.lookup(worker, &key).await;
            assert!(matches!(outcome, ActionOutcome::NotFound));
        }
    }

    #[test]
    fn hash_key_is_deterministic() {
        assert_eq!(hash_key(b"same"), hash_key(b"same"));
    }
}
