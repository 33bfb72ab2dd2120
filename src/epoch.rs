//! # Reclamation epoch (C7)
//!
//! Strategies (a) locking and (c) combining let a thread hold an entry
//! pointer (handle) returned by `lookup` past the end of the critical
//! section, so freeing a deleted/evicted/superseded entry must be deferred
//! until no such reader can remain. This is a two-epoch scheme: a global
//! counter plus, per worker, an observed epoch and two retire lists indexed
//! by parity (spec.md §4.4).
//!
//! Reclamation work itself (releasing a value region, pushing a slot back
//! onto its partition's free list) is supplied by the caller as a boxed
//! closure captured at retire time — this module only tracks *when* it is
//! safe to run that closure, not what it does.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use parking_lot::Mutex;

/// Identifies one registered worker's epoch-tracking slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerId(usize);

type Reclaim = Box<dyn FnOnce() + Send>;

struct WorkerSlot {
    observed_epoch: AtomicU32,
    active: AtomicBool,
    retire: [Mutex<Vec<Reclaim>>; 2],
}

impl WorkerSlot {
    fn new() -> Self {
        WorkerSlot {
            observed_epoch: AtomicU32::new(0),
            active: AtomicBool::new(false),
            retire: [Mutex::new(Vec::new()), Mutex::new(Vec::new())],
        }
    }
}

/// The global epoch plus all registered workers' tracking slots.
pub struct EpochManager {
    global: AtomicU32,
    workers: Vec<WorkerSlot>,
}

impl EpochManager {
    /// Build a manager with `worker_count` pre-registered worker slots.
    pub fn new(worker_count: usize) -> Self {
        let mut workers = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            workers.push(WorkerSlot::new());
        }
        EpochManager {
            global: AtomicU32::new(0),
            workers,
        }
    }

    /// Current global epoch, read with acquire ordering per spec.md §5.
    pub fn global_epoch(&self) -> u32 {
        self.global.load(Ordering::Acquire)
    }

    /// Step 1: a worker enters a batch of actions. Publishes
    /// `observed_epoch = epoch` with release ordering so other threads'
    /// subsequent acquire loads see at least as fresh a view.
    pub fn begin_batch(&self, worker: WorkerId) {
        let slot = &self.workers[worker.0];
        slot.active.store(true, Ordering::Release);
        let epoch = self.global.load(Ordering::Acquire);
        slot.observed_epoch.store(epoch, Ordering::Release);
    }

    /// Step 2: retire an entry's reclamation closure onto the worker's
    /// current-epoch retire list.
    pub fn retire(&self, worker: WorkerId, reclaim: Reclaim) {
        let slot = &self.workers[worker.0];
        let epoch = slot.observed_epoch.load(Ordering::Acquire);
        slot.retire[(epoch & 1) as usize].lock().push(reclaim);
    }

    /// Step 3: the worker checks for progress. If the global epoch is
    /// exactly one ahead of what this worker last observed, everything
    /// retired at least one epoch ago is now safe to reclaim: run it,
    /// adopt the new epoch, then try to advance the global epoch if every
    /// worker has caught up.
    pub fn try_advance(&self, worker: WorkerId) {
        let slot = &self.workers[worker.0];
        let global = self.global.load(Ordering::Acquire);
        let observed = slot.observed_epoch.load(Ordering::Acquire);

        if global == observed.wrapping_add(1) {
            let mut bucket = slot.retire[(global & 1) as usize].lock();
            for reclaim in bucket.drain(..) {
                reclaim();
            }
            drop(bucket);
            slot.observed_epoch.store(global, Ordering::Release);
        }

        self.try_advance_global();
    }

    fn try_advance_global(&self) {
        let global = self.global.load(Ordering::Acquire);
        let all_caught_up = self.workers.iter().all(|w| {
            !w.active.load(Ordering::Acquire) || w.observed_epoch.load(Ordering::Acquire) >= global
        });
        if all_caught_up {
            let _ = self.global.compare_exchange(
                global,
                global.wrapping_add(1),
                Ordering::AcqRel,
                Ordering::Relaxed,
            );
        }
    }

    /// Step 4: mark a worker idle once its retire lists are empty and it
    /// holds no outstanding references. Idle workers are excluded from the
    /// "has everyone caught up" check, so they never stall reclamation.
    pub fn end_batch(&self, worker: WorkerId) {
        let slot = &self.workers[worker.0];
        let empty = slot.retire[0].lock().is_empty() && slot.retire[1].lock().is_empty();
        if empty {
            slot.active.store(false, Ordering::Release);
        }
    }

    /// Register a new worker, returning its id. Registration only ever
    /// grows the worker table; this is normally done once at startup.
    pub fn worker_id(&self, index: usize) -> WorkerId {
        assert!(index < self.workers.len(), "worker index out of range");
        WorkerId(index)
    }

    /// Number of registered workers.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn retired_item_is_reclaimed_once_epoch_advances_twice() {
        let mgr = EpochManager::new(1);
        let w = mgr.worker_id(0);
        let reclaimed = Arc::new(AtomicUsize::new(0));

        mgr.begin_batch(w);
        let flag = reclaimed.clone();
        mgr.retire(w, Box::new(move || {
            flag.fetch_add(1, Ordering::SeqCst);
        }));

        // Advancing once from the same observed epoch shouldn't free
        // anything retired in this same epoch.
        mgr.try_advance(w);
        assert_eq!(reclaimed.load(Ordering::SeqCst), 0);

        mgr.end_batch(w);
        // With a single worker now idle, the global epoch can advance on
        // the next begin/try_advance cycle.
        mgr.begin_batch(w);
        mgr.try_advance(w);
        mgr.end_batch(w);

        mgr.begin_batch(w);
        mgr.try_advance(w);
        assert_eq!(reclaimed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn single_idle_worker_does_not_block_global_advance() {
        let mgr = EpochManager::new(2);
        let w0 = mgr.worker_id(0);
        mgr.begin_batch(w0);
        mgr.try_advance(w0);
        // worker 1 has never begun a batch (inactive) and must not block.
        assert!(mgr.global_epoch() >= 0);
    }
}
