//! # Cache context
//!
//! The handle every connection task shares: the partitioned [`Table`] plus
//! the counters the `stats` command reports and the [`Config`] the running
//! process was started with. Built once in `main` and passed around behind
//! an `Arc` (spec.md §2 data flow: "the binary wires A1-A4 around the C1-C10
//! core").

use std::sync::Arc;

use crate::alloc::{ArenaAllocator, ValueAllocator};
use crate::config::Config;
use crate::stats::Stats;
use crate::table::Table;

/// Everything a connection task needs to serve requests.
pub struct Cache {
    pub table: Table,
    pub stats: Stats,
    pub config: Config,
}

impl Cache {
    /// Build a cache context from a normalized config, sizing the value
    /// arena and entry pool per partition accordingly.
    pub fn new(config: Config, worker_count: usize) -> Self {
        let allocator: Arc<dyn ValueAllocator> = Arc::new(ArenaAllocator::new(config.volume));
        let table = Table::new(&config, allocator, worker_count);
        Cache {
            table,
            stats: Stats::new(),
            config,
        }
    }

    /// Bytes currently attributed to live values, for the `stats` `bytes`
    /// field.
    pub fn bytes_in_use(&self) -> u64 {
        self.table.allocator().in_use()
    }
}
