//! # Partition dispatch (C6)
//!
//! Three interchangeable strategies for serializing access to a
//! partition's mutable state, selected at startup by
//! [`crate::config::DispatchStrategy`] (spec.md §4.3):
//!
//! - [`locking`]: a reader-writer lock per partition. Simple, and fine
//!   under low-to-moderate contention.
//! - [`delegation`]: one owner task per partition; every other task sends
//!   it a boxed closure over a channel and awaits the reply. Trades a
//!   channel round-trip for zero lock contention.
//! - [`combining`]: flat combining over a lock-free queue. One thread at a
//!   time drains the queue and runs every enqueued closure in a tight
//!   batch, amortizing the cost of acquiring exclusive access across many
//!   actions.
//!
//! All three implement the same [`PartitionDispatch`] trait, so the
//! server harness (A4) and the executor (C10) are written once against
//! the trait object and never see which strategy is live.

pub mod combining;
pub mod delegation;
pub mod locking;

use async_trait::async_trait;

use crate::action::ActionOutcome;
use crate::partition::Partition;

/// A unit of work run against a locked partition. Boxed and `Send` so it
/// can cross a channel (delegation) or a lock-free queue (combining).
pub type PartitionJob = Box<dyn FnOnce(&mut Partition) -> ActionOutcome + Send>;

/// Common interface over the three dispatch strategies.
#[async_trait]
pub trait PartitionDispatch: Send + Sync {
    /// Run `job` against this dispatcher's partition with exclusive
    /// access, returning whatever it returns.
    async fn run(&self, job: PartitionJob) -> ActionOutcome;

    /// Index of the partition this dispatcher owns, for diagnostics.
    fn partition_id(&self) -> usize;
}
