//! # Stats / introspection (A5)
//!
//! The small set of running counters the `stats` command reports (SPEC_FULL.md
//! A5's minimal field list), plus the process start time used for `uptime`.
//! Every counter is a plain relaxed atomic: stats are diagnostic, never used
//! to make a correctness decision, so there is nothing to synchronize against.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Process-wide counters surfaced by the ascii `stats` command and,
/// eventually, any binary `STAT` polling.
pub struct Stats {
    started: Instant,
    pub curr_connections: AtomicU64,
    pub total_connections: AtomicU64,
    pub cmd_get: AtomicU64,
    pub cmd_set: AtomicU64,
    pub get_hits: AtomicU64,
    pub get_misses: AtomicU64,
    pub curr_items: AtomicU64,
    pub total_items: AtomicU64,
    pub evictions: AtomicU64,
}

impl Stats {
    /// Build a fresh counter set, timestamped at construction.
    pub fn new() -> Self {
        Stats {
            started: Instant::now(),
            curr_connections: AtomicU64::new(0),
            total_connections: AtomicU64::new(0),
            cmd_get: AtomicU64::new(0),
            cmd_set: AtomicU64::new(0),
            get_hits: AtomicU64::new(0),
            get_misses: AtomicU64::new(0),
            curr_items: AtomicU64::new(0),
            total_items: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Seconds since this process started serving.
    pub fn uptime(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Format the full `stats` reply body, one `STAT <name> <value>\r\n`
    /// line per field, matching memcached's plain-text introspection
    /// format (spec.md §4.6 recognized commands; SPEC_FULL.md A5).
    pub fn render(&self, pid: u32, bytes_in_use: u64) -> String {
        let mut out = String::new();
        let mut line = |name: &str, value: u64| {
            out.push_str(&format!("STAT {name} {value}\r\n"));
        };
        line("pid", pid as u64);
        line("uptime", self.uptime());
        line("curr_connections", self.curr_connections.load(Ordering::Relaxed));
        line("total_connections", self.total_connections.load(Ordering::Relaxed));
        line("cmd_get", self.cmd_get.load(Ordering::Relaxed));
        line("cmd_set", self.cmd_set.load(Ordering::Relaxed));
        line("get_hits", self.get_hits.load(Ordering::Relaxed));
        line("get_misses", self.get_misses.load(Ordering::Relaxed));
        line("curr_items", self.curr_items.load(Ordering::Relaxed));
        line("total_items", self.total_items.load(Ordering::Relaxed));
        line("evictions", self.evictions.load(Ordering::Relaxed));
        line("bytes", bytes_in_use);
        out.push_str("END\r\n");
        out
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_ends_with_end_marker() {
        let stats = Stats::new();
        stats.cmd_get.fetch_add(3, Ordering::Relaxed);
        let rendered = stats.render(1, 0);
        assert!(rendered.contains("STAT cmd_get 3\r\n"));
        assert!(rendered.ends_with("END\r\n"));
    }
}
