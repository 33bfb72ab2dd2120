//! Dispatch strategy (b): a single owner task per partition.
//!
//! Every other task reaches the partition only by sending it a boxed job
//! over an unbounded channel and awaiting a oneshot reply. The owner task
//! is the only code that ever touches the `Partition` value, so no lock is
//! needed at all; the cost moves from lock contention to a channel
//! round-trip per action (spec.md §4.3).

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::action::ActionOutcome;
use crate::partition::Partition;

use super::{PartitionDispatch, PartitionJob};

struct Envelope {
    job: PartitionJob,
    reply: oneshot::Sender<ActionOutcome>,
}

/// Delegation strategy dispatcher: a channel handle to the partition's
/// owner task.
pub struct DelegationDispatch {
    id: usize,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl DelegationDispatch {
    /// Spawn the owner task for `partition` and return a dispatcher handle
    /// to it. The owner task runs until every `DelegationDispatch` handle
    /// referencing it (and thus the sender) has been dropped.
    pub fn spawn(id: usize, partition: Partition) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(Self::owner_loop(partition, rx));
        DelegationDispatch { id, tx }
    }

    async fn owner_loop(mut partition: Partition, mut rx: mpsc::UnboundedReceiver<Envelope>) {
        while let Some(envelope) = rx.recv().await {
            let outcome = (envelope.job)(&mut partition);
            // The caller may have stopped waiting (connection dropped);
            // that is not this task's problem.
            let _ = envelope.reply.send(outcome);
        }
    }
}

#[async_trait]
impl PartitionDispatch for DelegationDispatch {
    async fn run(&self, job: PartitionJob) -> ActionOutcome {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(Envelope { job, reply: reply_tx }).is_err() {
            // Owner task has shut down; this only happens during process
            // teardown, never while the server is actually serving.
            return ActionOutcome::NotFound;
        }
        reply_rx.await.unwrap_or(ActionOutcome::NotFound)
    }

    fn partition_id(&self) -> usize {
        self.id
    }
}
