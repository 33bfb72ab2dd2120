//! # Command executor (C10)
//!
//! Turns one [`ParsedCommand`] into `Table` (C1-C9) calls and a wire reply
//! written into the connection's [`TxBuffer`], in whichever framing the
//! command arrived on. This is the one place that knows both "what the
//! cache core returned" and "how each wire format spells that result" —
//! everything upstream of here (the parsers) and everything downstream (the
//! socket write) is framing-agnostic.

use std::sync::atomic::Ordering;

use bytes::{BufMut, Bytes};

use crate::action::{ActionOutcome, ConcatOutcome, NumericOutcome};
use crate::cache::Cache;
use crate::clock::resolve_exptime;
use crate::conn::binary::{status, HEADER_LEN, MAGIC_RESPONSE};
use crate::conn::buffer::TxBuffer;
use crate::conn::command::{Command, Origin, ParsedCommand, StorageArgs};
use crate::epoch::WorkerId;

/// `true` once the connection has processed a `quit`/`QUIT` and should stop
/// reading further input.
pub async fn execute(cache: &Cache, worker: WorkerId, parsed: ParsedCommand, tx: &mut TxBuffer) -> bool {
    let ParsedCommand { command, origin } = parsed;
    match command {
        Command::Get { keys, with_cas } => {
            execute_get(cache, worker, keys, with_cas, origin, tx).await;
            false
        }
        Command::Set(args) => {
            execute_store(cache, worker, args, origin, tx, StoreVerb::Set).await;
            false
        }
        Command::Add(args) => {
            execute_store(cache, worker, args, origin, tx, StoreVerb::Add).await;
            false
        }
        Command::Replace(args) => {
            execute_store(cache, worker, args, origin, tx, StoreVerb::Replace).await;
            false
        }
        Command::Cas(args) => {
            execute_store(cache, worker, args, origin, tx, StoreVerb::Cas).await;
            false
        }
        Command::Append(args) => {
            execute_concat(cache, worker, args, origin, tx, false).await;
            false
        }
        Command::Prepend(args) => {
            execute_concat(cache, worker, args, origin, tx, true).await;
            false
        }
        Command::Incr { key, delta, noreply, auto_create } => {
            execute_numeric(cache, worker, key, delta, false, noreply, auto_create, origin, tx).await;
            false
        }
        Command::Decr { key, delta, noreply, auto_create } => {
            execute_numeric(cache, worker, key, delta, true, noreply, auto_create, origin, tx).await;
            false
        }
        Command::Delete { key, noreply } => {
            execute_delete(cache, worker, key, noreply, origin, tx).await;
            false
        }
        Command::Touch { key, exptime, noreply } => {
            execute_touch(cache, worker, key, exptime, noreply, origin, tx).await;
            false
        }
        Command::FlushAll { exptime, noreply } => {
            execute_flush(cache, worker, exptime, noreply, origin, tx).await;
            false
        }
        Command::Stats => {
            execute_stats(cache, origin, tx);
            false
        }
        Command::Slabs => {
            execute_slabs(origin, tx);
            false
        }
        Command::Verbosity { noreply, .. } => {
            execute_ok(noreply, origin, tx);
            false
        }
        Command::Version => {
            execute_version(origin, tx);
            false
        }
        Command::Noop => {
            if let Origin::Binary { opcode, opaque, .. } = origin {
                write_binary(tx, opcode, status::NO_ERROR, opaque, 0, &[], &[], &[]);
            }
            false
        }
        Command::Quit => {
            if let Origin::Binary { opcode, opaque, .. } = origin {
                write_binary(tx, opcode, status::NO_ERROR, opaque, 0, &[], &[], &[]);
            }
            true
        }
        Command::UnknownOpcode => {
            if let Origin::Binary { opcode, opaque, .. } = origin {
                write_binary(tx, opcode, status::UNKNOWN_COMMAND, opaque, 0, &[], &[], b"unknown opcode");
            }
            false
        }
    }
}

enum StoreVerb {
    Set,
    Add,
    Replace,
    Cas,
}

async fn execute_get(cache: &Cache, worker: WorkerId, keys: Vec<Bytes>, with_cas: bool, origin: Origin, tx: &mut TxBuffer) {
    for key in keys {
        cache.stats.cmd_get.fetch_add(1, Ordering::Relaxed);
        let outcome = cache.table.lookup(worker, &key).await;
        match outcome {
            ActionOutcome::Found { flags, stamp, value } => {
                cache.stats.get_hits.fetch_add(1, Ordering::Relaxed);
                match origin {
                    Origin::Ascii => write_ascii_value(tx, &key, flags, &value, if with_cas { Some(stamp) } else { None }),
                    Origin::Binary { opcode, opaque, with_key, .. } => {
                        let mut extras = Vec::with_capacity(4);
                        extras.put_u32(flags);
                        let key_out: &[u8] = if with_key { &key } else { &[] };
                        write_binary(tx, opcode, status::NO_ERROR, opaque, stamp, &extras, key_out, &value);
                    }
                }
            }
            _ => {
                cache.stats.get_misses.fetch_add(1, Ordering::Relaxed);
                if let Origin::Binary { opcode, opaque, quiet, .. } = origin {
                    if !quiet {
                        write_binary(tx, opcode, status::KEY_NOT_FOUND, opaque, 0, &[], &[], b"Not found");
                    }
                }
            }
        }
    }
    if matches!(origin, Origin::Ascii) {
        tx.write(b"END\r\n");
    }
}

fn write_ascii_value(tx: &mut TxBuffer, key: &[u8], flags: u32, value: &[u8], cas: Option<u64>) {
    match cas {
        Some(cas) => tx.write(format!("VALUE {} {} {} {}\r\n", String::from_utf8_lossy(key), flags, value.len(), cas).as_bytes()),
        None => tx.write(format!("VALUE {} {} {}\r\n", String::from_utf8_lossy(key), flags, value.len()).as_bytes()),
    }
    tx.write(value);
    tx.write(b"\r\n");
}

async fn execute_store(cache: &Cache, worker: WorkerId, args: StorageArgs, origin: Origin, tx: &mut TxBuffer, verb: StoreVerb) {
    let now = cache.table.clock().now();
    let exptime = resolve_exptime(args.exptime, now);
    let StorageArgs { key, flags, value, cas_token, noreply, .. } = args;
    cache.stats.cmd_set.fetch_add(1, Ordering::Relaxed);

    let outcome = match verb {
        StoreVerb::Set => cache.table.upsert(worker, &key, value.to_vec(), flags, exptime).await,
        StoreVerb::Add => cache.table.insert(worker, &key, value.to_vec(), flags, exptime).await,
        StoreVerb::Replace => cache.table.update(worker, &key, value.to_vec(), flags, exptime).await,
        StoreVerb::Cas => {
            let token = match cas_token {
                Some(token) => token,
                None => {
                    reply_error(origin, tx, noreply, "bad command line format");
                    return;
                }
            };
            cache.table.alter(worker, &key, value.to_vec(), flags, exptime, token).await
        }
    };

    if matches!(outcome, ActionOutcome::Stored) {
        cache.stats.total_items.fetch_add(1, Ordering::Relaxed);
    }

    match origin {
        Origin::Ascii => {
            if noreply {
                return;
            }
            let line: &[u8] = match outcome {
                ActionOutcome::Stored => b"STORED\r\n",
                ActionOutcome::NotStored => b"NOT_STORED\r\n",
                ActionOutcome::Exists => b"EXISTS\r\n",
                ActionOutcome::NotFound => b"NOT_FOUND\r\n",
                ActionOutcome::TooLarge => b"SERVER_ERROR object too large for cache\r\n",
                _ => b"SERVER_ERROR out of memory storing object\r\n",
            };
            tx.write(line);
        }
        Origin::Binary { opcode, opaque, cas: _, quiet, .. } => {
            let status = match outcome {
                ActionOutcome::Stored => status::NO_ERROR,
                ActionOutcome::NotStored => status::ITEM_NOT_STORED,
                ActionOutcome::Exists => status::KEY_EXISTS,
                ActionOutcome::NotFound => status::KEY_NOT_FOUND,
                ActionOutcome::TooLarge => status::VALUE_TOO_LARGE,
                _ => status::OUT_OF_MEMORY,
            };
            if status == status::NO_ERROR {
                if !quiet {
                    let cas = fetch_cas(cache, worker, &key).await;
                    write_binary(tx, opcode, status, opaque, cas, &[], &[], &[]);
                }
            } else {
                write_binary(tx, opcode, status, opaque, 0, &[], &[], status_message(status).as_bytes());
            }
        }
    }
}

async fn execute_concat(cache: &Cache, worker: WorkerId, args: StorageArgs, origin: Origin, tx: &mut TxBuffer, prepend: bool) {
    let StorageArgs { key, value, noreply, .. } = args;
    let outcome = cache.table.concat(worker, &key, value.to_vec(), prepend).await;

    match origin {
        Origin::Ascii => {
            if noreply {
                return;
            }
            let line: &[u8] = match outcome {
                ConcatOutcome::Stored => b"STORED\r\n",
                ConcatOutcome::NotStored => b"NOT_STORED\r\n",
                ConcatOutcome::TooLarge => b"SERVER_ERROR object too large for cache\r\n",
                ConcatOutcome::OutOfMemory => b"SERVER_ERROR out of memory storing object\r\n",
            };
            tx.write(line);
        }
        Origin::Binary { opcode, opaque, quiet, .. } => {
            let status = match outcome {
                ConcatOutcome::Stored => status::NO_ERROR,
                ConcatOutcome::NotStored => status::ITEM_NOT_STORED,
                ConcatOutcome::TooLarge => status::VALUE_TOO_LARGE,
                ConcatOutcome::OutOfMemory => status::OUT_OF_MEMORY,
            };
            if status == status::NO_ERROR {
                if !quiet {
                    let cas = fetch_cas(cache, worker, &key).await;
                    write_binary(tx, opcode, status, opaque, cas, &[], &[], &[]);
                }
            } else {
                write_binary(tx, opcode, status, opaque, 0, &[], &[], status_message(status).as_bytes());
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn execute_numeric(
    cache: &Cache,
    worker: WorkerId,
    key: Bytes,
    delta: u64,
    decrement: bool,
    noreply: bool,
    auto_create: Option<(u64, i64)>,
    origin: Origin,
    tx: &mut TxBuffer,
) {
    let now = cache.table.clock().now();
    let auto_create = auto_create.map(|(initial, raw_exptime)| (initial, resolve_exptime(raw_exptime, now) as i64));
    let outcome = cache.table.incr_decr(worker, &key, delta, decrement, auto_create).await;

    match origin {
        Origin::Ascii => {
            if noreply {
                return;
            }
            match outcome {
                NumericOutcome::Value(value) => tx.write(format!("{value}\r\n").as_bytes()),
                NumericOutcome::NotFound => tx.write(b"NOT_FOUND\r\n"),
                NumericOutcome::NonNumeric => {
                    tx.write(b"CLIENT_ERROR cannot increment or decrement non-numeric value\r\n")
                }
                NumericOutcome::TooLarge => tx.write(b"SERVER_ERROR object too large for cache\r\n"),
                NumericOutcome::OutOfMemory => tx.write(b"SERVER_ERROR out of memory storing object\r\n"),
            }
        }
        Origin::Binary { opcode, opaque, quiet, .. } => match outcome {
            NumericOutcome::Value(value) => {
                if !quiet {
                    let mut body = Vec::with_capacity(8);
                    body.put_u64(value);
                    let cas = fetch_cas(cache, worker, &key).await;
                    write_binary(tx, opcode, status::NO_ERROR, opaque, cas, &[], &[], &body);
                }
            }
            NumericOutcome::NotFound => {
                write_binary(tx, opcode, status::KEY_NOT_FOUND, opaque, 0, &[], &[], b"Not found");
            }
            NumericOutcome::NonNumeric => {
                write_binary(tx, opcode, status::NON_NUMERIC_VALUE, opaque, 0, &[], &[], b"Non-numeric value");
            }
            NumericOutcome::TooLarge => {
                write_binary(tx, opcode, status::VALUE_TOO_LARGE, opaque, 0, &[], &[], b"Too large");
            }
            NumericOutcome::OutOfMemory => {
                write_binary(tx, opcode, status::OUT_OF_MEMORY, opaque, 0, &[], &[], b"Out of memory");
            }
        },
    }
}

async fn execute_delete(cache: &Cache, worker: WorkerId, key: Bytes, noreply: bool, origin: Origin, tx: &mut TxBuffer) {
    let outcome = cache.table.delete(worker, &key).await;
    match origin {
        Origin::Ascii => {
            if noreply {
                return;
            }
            let line: &[u8] = if matches!(outcome, ActionOutcome::Deleted) { b"DELETED\r\n" } else { b"NOT_FOUND\r\n" };
            tx.write(line);
        }
        Origin::Binary { opcode, opaque, quiet, .. } => {
            if matches!(outcome, ActionOutcome::Deleted) {
                if !quiet {
                    write_binary(tx, opcode, status::NO_ERROR, opaque, 0, &[], &[], &[]);
                }
            } else {
                write_binary(tx, opcode, status::KEY_NOT_FOUND, opaque, 0, &[], &[], b"Not found");
            }
        }
    }
}

async fn execute_touch(cache: &Cache, worker: WorkerId, key: Bytes, exptime: i64, noreply: bool, origin: Origin, tx: &mut TxBuffer) {
    let now = cache.table.clock().now();
    let exptime = resolve_exptime(exptime, now);
    let outcome = cache.table.touch(worker, &key, exptime).await;
    match origin {
        Origin::Ascii => {
            if noreply {
                return;
            }
            let line: &[u8] = if matches!(outcome, ActionOutcome::Stored) { b"TOUCHED\r\n" } else { b"NOT_FOUND\r\n" };
            tx.write(line);
        }
        Origin::Binary { opcode, opaque, quiet, .. } => {
            if matches!(outcome, ActionOutcome::Stored) {
                if !quiet {
                    write_binary(tx, opcode, status::NO_ERROR, opaque, 0, &[], &[], &[]);
                }
            } else {
                write_binary(tx, opcode, status::KEY_NOT_FOUND, opaque, 0, &[], &[], b"Not found");
            }
        }
    }
}

async fn execute_flush(cache: &Cache, worker: WorkerId, exptime: i64, noreply: bool, origin: Origin, tx: &mut TxBuffer) {
    // A non-zero delay is accepted for wire compatibility but flushed
    // immediately: deferred flush would need a scheduled task per request,
    // which spec.md does not call for anywhere else in the design.
    let _ = exptime;
    cache.table.flush(worker).await;
    match origin {
        Origin::Ascii => {
            if !noreply {
                tx.write(b"OK\r\n");
            }
        }
        Origin::Binary { opcode, opaque, quiet, .. } => {
            if !quiet {
                write_binary(tx, opcode, status::NO_ERROR, opaque, 0, &[], &[], &[]);
            }
        }
    }
}

fn execute_stats(cache: &Cache, origin: Origin, tx: &mut TxBuffer) {
    match origin {
        Origin::Ascii => {
            let pid = std::process::id();
            let rendered = cache.stats.render(pid, cache.bytes_in_use());
            tx.write(rendered.as_bytes());
        }
        Origin::Binary { opcode, opaque, .. } => {
            // A minimal STAT reply: one NO_ERROR, zero-length terminator,
            // same convention memcached's binary STAT uses to end the list.
            write_binary(tx, opcode, status::NO_ERROR, opaque, 0, &[], &[], &[]);
        }
    }
}

fn execute_slabs(origin: Origin, tx: &mut TxBuffer) {
    match origin {
        Origin::Ascii => tx.write(b"END\r\n"),
        Origin::Binary { opcode, opaque, .. } => write_binary(tx, opcode, status::NO_ERROR, opaque, 0, &[], &[], &[]),
    }
}

fn execute_ok(noreply: bool, origin: Origin, tx: &mut TxBuffer) {
    match origin {
        Origin::Ascii => {
            if !noreply {
                tx.write(b"OK\r\n");
            }
        }
        Origin::Binary { opcode, opaque, .. } => write_binary(tx, opcode, status::NO_ERROR, opaque, 0, &[], &[], &[]),
    }
}

fn execute_version(origin: Origin, tx: &mut TxBuffer) {
    let version = env!("CARGO_PKG_VERSION");
    match origin {
        Origin::Ascii => tx.write(format!("VERSION {version}\r\n").as_bytes()),
        Origin::Binary { opcode, opaque, .. } => write_binary(tx, opcode, status::NO_ERROR, opaque, 0, &[], &[], version.as_bytes()),
    }
}

fn reply_error(origin: Origin, tx: &mut TxBuffer, noreply: bool, message: &str) {
    match origin {
        Origin::Ascii => {
            if !noreply {
                tx.write(format!("CLIENT_ERROR {message}\r\n").as_bytes());
            }
        }
        Origin::Binary { opcode, opaque, .. } => {
            write_binary(tx, opcode, status::INVALID_ARGUMENTS, opaque, 0, &[], &[], message.as_bytes());
        }
    }
}

fn status_message(code: u16) -> &'static str {
    match code {
        status::KEY_NOT_FOUND => "Not found",
        status::KEY_EXISTS => "Data exists for key",
        status::VALUE_TOO_LARGE => "Too large",
        status::INVALID_ARGUMENTS => "Invalid arguments",
        status::ITEM_NOT_STORED => "Not stored",
        status::NON_NUMERIC_VALUE => "Non-numeric value",
        status::OUT_OF_MEMORY => "Out of memory",
        _ => "Unknown error",
    }
}

/// Fetch the current stamp for `key` to echo as a binary response's CAS
/// value. A successful mutation already knows its own fresh stamp inside
/// the partition's critical section, but `ActionOutcome::Stored` does not
/// carry it back out; this costs one extra lookup round-trip on the binary
/// success path rather than widening the shared action-engine result type.
async fn fetch_cas(cache: &Cache, worker: WorkerId, key: &[u8]) -> u64 {
    match cache.table.lookup(worker, key).await {
        ActionOutcome::Found { stamp, .. } => stamp,
        _ => 0,
    }
}

#[allow(clippy::too_many_arguments)]
fn write_binary(tx: &mut TxBuffer, opcode: u8, status: u16, opaque: u32, cas: u64, extras: &[u8], key: &[u8], value: &[u8]) {
    let body_len = extras.len() + key.len() + value.len();
    let mut header = Vec::with_capacity(HEADER_LEN);
    header.put_u8(MAGIC_RESPONSE);
    header.put_u8(opcode);
    header.put_u16(key.len() as u16);
    header.put_u8(extras.len() as u8);
    header.put_u8(0); // data_type
    header.put_u16(status);
    header.put_u32(body_len as u32);
    header.put_u32(opaque);
    header.put_u64(cas);
    tx.write(&header);
    tx.write(extras);
    tx.write(key);
    tx.write(value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::conn::command::{Command, Origin, ParsedCommand};

    fn test_cache() -> Cache {
        let config = Config { nparts: 2, ..Config::default() }.normalize().unwrap();
        Cache::new(config, 1)
    }

    #[tokio::test]
    async fn set_then_get_round_trips_in_ascii() {
        let cache = test_cache();
        let worker = cache.table.epoch().worker_id(0);
        let mut tx = TxBuffer::new(4096);

        let set = ParsedCommand::ascii(Command::Set(StorageArgs {
            key: Bytes::from_static(b"k"),
            flags: 0,
            exptime: 0,
            value: Bytes::from_static(b"v"),
            cas_token: None,
            noreply: false,
        }));
        execute(&cache, worker, set, &mut tx).await;
        let written = tx.take();
        assert_eq!(&written[..], b"STORED\r\n");

        let get = ParsedCommand::ascii(Command::Get { keys: vec![Bytes::from_static(b"k")], with_cas: false });
        execute(&cache, worker, get, &mut tx).await;
        let written = tx.take();
        assert_eq!(&written[..], b"VALUE k 0 1\r\nv\r\nEND\r\n");
    }

    #[tokio::test]
    async fn add_twice_is_not_stored() {
        let cache = test_cache();
        let worker = cache.table.epoch().worker_id(0);
        let mut tx = TxBuffer::new(4096);

        let args = || StorageArgs {
            key: Bytes::from_static(b"k"),
            flags: 0,
            exptime: 0,
            value: Bytes::from_static(b"v"),
            cas_token: None,
            noreply: false,
        };
        execute(&cache, worker, ParsedCommand::ascii(Command::Add(args())), &mut tx).await;
        tx.take();
        execute(&cache, worker, ParsedCommand::ascii(Command::Add(args())), &mut tx).await;
        assert_eq!(&tx.take()[..], b"NOT_STORED\r\n");
    }

    #[tokio::test]
    async fn binary_get_miss_is_quiet_on_getq() {
        let cache = test_cache();
        let worker = cache.table.epoch().worker_id(0);
        let mut tx = TxBuffer::new(4096);

        let origin = Origin::Binary { opcode: 0x09, opaque: 7, cas: 0, quiet: true, with_key: false };
        let get = ParsedCommand { command: Command::Get { keys: vec![Bytes::from_static(b"missing")], with_cas: true }, origin };
        execute(&cache, worker, get, &mut tx).await;
        assert!(tx.is_empty());
    }

    #[tokio::test]
    async fn incr_on_missing_key_is_not_found_in_ascii() {
        let cache = test_cache();
        let worker = cache.table.epoch().worker_id(0);
        let mut tx = TxBuffer::new(4096);

        let incr = ParsedCommand::ascii(Command::Incr { key: Bytes::from_static(b"ctr"), delta: 1, noreply: false, auto_create: None });
        execute(&cache, worker, incr, &mut tx).await;
        assert_eq!(&tx.take()[..], b"NOT_FOUND\r\n");
    }

    #[tokio::test]
    async fn quit_signals_connection_close() {
        let cache = test_cache();
        let worker = cache.table.epoch().worker_id(0);
        let mut tx = TxBuffer::new(4096);
        let close = execute(&cache, worker, ParsedCommand::ascii(Command::Quit), &mut tx).await;
        assert!(close);
    }
}
