//! Parsed command representation shared by both wire formats.
//!
//! The ascii and binary parsers (§4.6 of spec.md) each produce this same
//! [`Command`] enum, so the executor (C10) never needs to duplicate its
//! dispatch logic per framing. What differs between the two wire formats is
//! only *how a response is written back*, so each command travels alongside
//! an [`Origin`] that the executor consults solely when formatting output.

use bytes::Bytes;

/// One parsed client request, independent of wire framing.
#[derive(Debug, Clone)]
pub enum Command {
    /// `get`/`gets` (ascii, possibly multi-key) or binary `GET`/`GETQ`/
    /// `GETK`/`GETKQ` (always one key; framing details live in [`Origin`]).
    Get { keys: Vec<Bytes>, with_cas: bool },
    /// `set`.
    Set(StorageArgs),
    /// `add`.
    Add(StorageArgs),
    /// `replace`.
    Replace(StorageArgs),
    /// `append`.
    Append(StorageArgs),
    /// `prepend`.
    Prepend(StorageArgs),
    /// `cas`.
    Cas(StorageArgs),
    /// `incr` / binary `INCREMENT`. `auto_create` is only ever `Some` on the
    /// binary path: memcached's binary incr/decr can vivify a missing key
    /// with an initial value and expiration rather than failing (spec.md
    /// §6 bit-exact compatibility); the ascii path never offers this.
    Incr { key: Bytes, delta: u64, noreply: bool, auto_create: Option<(u64, i64)> },
    /// `decr` / binary `DECREMENT`.
    Decr { key: Bytes, delta: u64, noreply: bool, auto_create: Option<(u64, i64)> },
    /// `delete`.
    Delete { key: Bytes, noreply: bool },
    /// `touch`.
    Touch { key: Bytes, exptime: i64, noreply: bool },
    /// `flush_all [exptime]`.
    FlushAll { exptime: i64, noreply: bool },
    /// `stats` (no sub-argument; `stats slabs`/`stats items` are covered
    /// by [`Command::Slabs`], per SPEC_FULL.md A5).
    Stats,
    /// `slabs ...` / binary unsupported — answered with an empty/placeholder
    /// reply rather than a protocol error, per SPEC_FULL.md A5 (slab-class
    /// compatibility is explicitly a non-goal).
    Slabs,
    /// `verbosity <level>`.
    Verbosity { level: u32, noreply: bool },
    /// `version`.
    Version,
    /// binary `NOOP`: round-trip the opaque with a bare success status.
    Noop,
    /// `quit`.
    Quit,
    /// A recognized binary header whose opcode this server does not
    /// implement; answered with `UNKNOWN_COMMAND` (spec.md §6 status
    /// table). Never produced by the ascii parser, which instead raises a
    /// [`crate::error::ProtocolError::UnknownCommand`].
    UnknownOpcode,
}

/// Which wire framing produced a [`Command`], carrying exactly the bits the
/// executor (C10) needs to format the matching reply and nothing else.
#[derive(Debug, Clone, Copy)]
pub enum Origin {
    /// Ascii protocol: replies are `\r\n`-terminated text lines.
    Ascii,
    /// Binary protocol: replies are 24-byte headers plus an optional body.
    /// `opcode` is echoed back in the response header verbatim (including
    /// its Q-variant, per the wire format); `opaque` and (for storage hits)
    /// `cas` are echoed back verbatim; `quiet` suppresses success/miss
    /// replies per spec.md §6's Q-opcode convention (errors are always sent
    /// even when quiet).
    Binary { opcode: u8, opaque: u32, cas: u64, quiet: bool, with_key: bool },
}

/// One parsed request paired with the framing it arrived on.
#[derive(Debug, Clone)]
pub struct ParsedCommand {
    pub command: Command,
    pub origin: Origin,
}

impl ParsedCommand {
    /// Wrap a command parsed off the ascii stream, which always replies in
    /// ascii framing.
    pub fn ascii(command: Command) -> Self {
        ParsedCommand { command, origin: Origin::Ascii }
    }
}

/// Common fields shared by every storage command.
#[derive(Debug, Clone)]
pub struct StorageArgs {
    pub key: Bytes,
    pub flags: u32,
    pub exptime: i64,
    pub value: Bytes,
    pub cas_token: Option<u64>,
    pub noreply: bool,
}
