//! # memvault
//!
//! An in-memory key-value cache server speaking the memcached text and
//! binary wire protocols.
//!
//! ## Architecture
//!
//! - `entry`/`bucket`/`partition`/`table`: the partitioned concurrent hash
//!   table (C1, C2, C4, C3's consumer) — the core this crate exists to
//!   implement.
//! - `action`: the pure table mutations (lookup/insert/upsert/alter/stride/
//!   evict/flush/...) that run under a partition's chosen synchronization
//!   discipline (C5).
//! - `dispatch`: the three interchangeable synchronization strategies a
//!   partition can be built with — locking, delegation, combining (C6).
//! - `epoch`: the two-epoch deferred-reclamation scheme that lets a reader
//!   hold an entry reference without a lock on the entry itself (C7).
//! - `clock`: the coarse, 1 Hz-refreshed expiration clock (C8).
//! - `conn`: per-connection buffers, the ascii/binary parsers, and the
//!   command executor (C9, C10).
//! - `alloc`: the value-region arena backing entry payloads (C3).
//! - `cache`: the shared context (table + stats + config) every connection
//!   task is handed.
//! - `server`: the TCP accept loop and graceful-shutdown plumbing.
//! - `config`, `error`, `stats`: the ambient config surface, error
//!   taxonomy, and introspection counters.

pub mod action;
pub mod alloc;
pub mod bucket;
pub mod cache;
pub mod clock;
pub mod config;
pub mod conn;
pub mod dispatch;
pub mod entry;
pub mod epoch;
pub mod error;
pub mod partition;
pub mod server;
pub mod stats;
pub mod table;

/// Default number of `stride`/`evict` housekeeping passes run per tick of
/// the background maintenance task, one per partition round-robin (see
/// [`server::run_maintenance`]).
pub const MAINTENANCE_TICK_MILLIS: u64 = 50;

/// Crate version, forwarded from `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
