//! # Server harness (A4)
//!
//! The TCP accept loop and graceful-shutdown plumbing spec.md treats as an
//! external collaborator ("event-loop reactor... out of scope") but which a
//! runnable binary still needs. One tokio task is spawned per accepted
//! connection; each owns a [`Connection`] (C9) for its lifetime. Dispatch
//! strategy is irrelevant here — connections reach a partition only through
//! `Table`, which already hides which strategy is backing it.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use crate::action::ActionOutcome;
use crate::cache::Cache;
use crate::conn::Connection;
use crate::epoch::WorkerId;

/// A bound, not-yet-accepting TCP listener.
pub struct Server {
    listener: TcpListener,
    local_addr: std::net::SocketAddr,
}

impl Server {
    /// Bind to `cache.config`'s configured address and port.
    pub async fn bind(cache: &Cache) -> std::io::Result<Self> {
        let addr = format!("{}:{}", cache.config.addr, cache.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        log::info!("listening on {local_addr}");
        Ok(Server { listener, local_addr })
    }

    /// The address actually bound, useful when `port: 0` was requested (as
    /// integration tests do) and the kernel picked one.
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    /// Accept connections until `shutdown` is signalled, spawning one task
    /// per connection. Each connection is handed the next round-robin
    /// worker id so reclamation-epoch bookkeeping (C7) is spread evenly
    /// across the registered workers rather than funneled through worker 0.
    pub async fn run(self, cache: Arc<Cache>, mut shutdown: watch::Receiver<bool>) {
        let worker_count = cache.table.epoch().worker_count().max(1);
        let mut next_worker = 0usize;

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (socket, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(err) => {
                            log::warn!("accept failed: {err}");
                            continue;
                        }
                    };
                    let worker = cache.table.epoch().worker_id(next_worker % worker_count);
                    next_worker = next_worker.wrapping_add(1);
                    let cache = cache.clone();
                    tokio::spawn(async move {
                        configure_socket(&socket);
                        log::trace!("accepted connection from {peer}");
                        let conn = Connection::new(&cache);
                        conn.serve(cache, worker, socket).await;
                    });
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        log::info!("shutdown signalled, no longer accepting connections");
                        break;
                    }
                }
            }
        }
    }
}

fn configure_socket(socket: &TcpStream) {
    // Memcached workloads are latency-sensitive request/response chatter;
    // Nagle's algorithm would add up to 40ms of needless delay per write.
    if let Err(err) = socket.set_nodelay(true) {
        log::debug!("failed to set TCP_NODELAY: {err}");
    }
}

/// Default victim count per `evict` sweep; spec.md §9 leaves the exact
/// count open ("any value in `[1, 64]` satisfies the observable
/// invariants") so this picks the middle of that range.
const DEFAULT_EVICT_VICTIMS: usize = 32;

/// Buckets promoted per `stride` step (spec.md §4.1 `STRIDE_WIDTH`).
const STRIDE_WIDTH: usize = 64;

/// Round-robins `stride`/`evict` housekeeping across every partition on a
/// fixed tick, using `worker` for the epoch bookkeeping `evict` needs to
/// defer freeing unlinked entries (spec.md §2: "When C4 crosses load or
/// volume thresholds, C5 schedules incremental stride or eviction tasks").
/// Each partition gates its own `evicting`/`striding` flag (spec.md §4.1),
/// so scheduling a pass against a partition that does not need one is a
/// cheap no-op rather than wasted work.
pub async fn run_maintenance(cache: Arc<Cache>, worker: WorkerId, mut shutdown: watch::Receiver<bool>) {
    let nparts = cache.table.nparts();
    let mut ticker = tokio::time::interval(std::time::Duration::from_millis(crate::MAINTENANCE_TICK_MILLIS));
    let mut idx = 0usize;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if nparts == 0 {
                    continue;
                }
                cache.table.maybe_stride(idx, STRIDE_WIDTH).await;
                let outcome = cache.table.maybe_evict(worker, idx, DEFAULT_EVICT_VICTIMS).await;
                if let ActionOutcome::Evicted { count } = outcome {
                    if count > 0 {
                        cache.stats.evictions.fetch_add(count as u64, Ordering::Relaxed);
                    }
                }
                idx = (idx + 1) % nparts;
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
