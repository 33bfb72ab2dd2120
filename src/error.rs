//! Crate-wide error taxonomy.
//!
//! Errors split along the same lines as spec.md §7: protocol errors never
//! leave the connection task (they are turned into wire-level replies),
//! store errors are either fatal (allocator exhaustion) or degrade gracefully
//! (partition growth failure), and config errors are reported before the
//! server ever binds a socket.

use thiserror::Error;

/// Errors raised while parsing a client request, on either wire format.
/// Never propagated past the connection task: the executor (C10) turns
/// each variant into the matching `ERROR`/`CLIENT_ERROR` ascii reply or
/// binary status code and keeps the connection open unless the framing
/// itself is unrecoverable (spec.md §7 "sticky error/trash state").
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The command line (or binary header) did not match any known shape.
    #[error("malformed request: {0}")]
    Malformed(String),

    /// The verb itself is not recognized.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// A binary-protocol frame declared a body larger than the server is
    /// willing to buffer.
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    /// Unrecoverable framing: binary magic mismatch, or more prefix bytes
    /// consumed between commands than the configured cap allows. The
    /// connection is marked `trash` and closed without a reply, per
    /// spec.md §7 ("grossly malformed input... sets `trash` and silently
    /// closes the socket"), rather than answered like the variants above.
    #[error("connection trashed: {0}")]
    Trash(String),

    /// A binary-protocol frame whose header parsed far enough to know the
    /// opcode/opaque to reply through, but whose shape the server rejects
    /// (wrong `ext_len`, key+ext longer than body). Answered with a binary
    /// status frame, never the ascii `ERROR\r\n` line (spec.md §7: "Binary:
    /// consume body, reply with INVALID_ARGUMENTS... continue").
    #[error("binary protocol error on opcode {opcode:#x}: {message}")]
    BinaryFrame {
        opcode: u8,
        opaque: u32,
        status: u16,
        message: String,
    },
}

/// Errors raised while parsing or validating a CLI/config surface.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A numeric option was out of the range the server can operate in.
    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue {
        /// Name of the offending config field.
        field: &'static str,
        /// Human-readable explanation.
        reason: String,
    },
}

/// Errors raised by the value allocator (C3) and partition growth.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The value allocator has no more address space to hand out. Fatal:
    /// per spec.md §7 this is unrecoverable for the process.
    #[error("value allocator exhausted: requested {requested} bytes, {available} available")]
    AllocatorExhausted {
        /// Bytes requested by the failed allocation.
        requested: usize,
        /// Bytes still available in the arena, for diagnostics.
        available: usize,
    },

    /// A partition could not grow its bucket array or entry pool further.
    /// Non-fatal: the partition keeps serving at its current capacity.
    #[error("partition {partition} failed to grow {what}: {reason}")]
    GrowthFailed {
        /// Index of the partition that failed to grow.
        partition: usize,
        /// Which structure failed to grow ("buckets" or "entry pool").
        what: &'static str,
        /// Human-readable explanation.
        reason: String,
    },
}

/// Top-level error type surfaced from `main`.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Wraps a fatal store error (allocator exhaustion).
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Wraps a config error.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Wraps a socket-level I/O error while binding or accepting.
    #[error("network error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the store layer.
pub type StoreResult<T> = Result<T, StoreError>;

/// Convenience alias used by config loading.
pub type ConfigResult<T> = Result<T, ConfigError>;
