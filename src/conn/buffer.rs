//! Segmented read/write buffers for one connection.
//!
//! Both parsers are resumable: a single `read()` off the socket rarely
//! lines up with a command boundary, so the buffer must retain whatever
//! was not yet consumed and let the next read append to it rather than
//! starting over. `RxBuffer` grows in `rx_chunk_size`-sized steps (spec.md
//! §6) and exposes only the two primitives the parsers need: find a
//! terminated line, and take an exact byte count once it is known to be
//! present (the "safepoint" a parser returns to after discovering a
//! storage command's announced payload length but before that many bytes
//! have actually arrived).

use bytes::{Buf, Bytes, BytesMut};

/// Inbound byte buffer.
pub struct RxBuffer {
    chunk_size: usize,
    buf: BytesMut,
}

impl RxBuffer {
    /// Build an empty buffer that grows in `chunk_size`-sized steps.
    pub fn new(chunk_size: usize) -> Self {
        RxBuffer {
            chunk_size,
            buf: BytesMut::new(),
        }
    }

    /// Ensure there is room for at least one more chunk, growing the
    /// buffer's spare capacity before a socket read.
    pub fn reserve_chunk(&mut self) {
        if self.buf.spare_capacity_mut().is_empty() {
            self.buf.reserve(self.chunk_size);
        }
    }

    /// Mutable access to the buffer for an `AsyncReadExt::read_buf` call.
    pub fn inner_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Bytes currently buffered and unconsumed.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// `true` if there is nothing left to parse.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Locate a line terminated by `\r\n` or a bare `\n` (spec.md §4.6
    /// accepts either), returning and consuming it without the terminator.
    /// Leaves the buffer untouched if no terminator has arrived yet, so the
    /// caller can read more and retry.
    pub fn take_line(&mut self) -> Option<Bytes> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        let has_cr = pos > 0 && self.buf[pos - 1] == b'\r';
        let line_end = if has_cr { pos - 1 } else { pos };
        let line = self.buf.split_to(line_end);
        self.buf.advance(pos - line_end + 1);
        Some(line.freeze())
    }

    /// `true` once at least `n` bytes are buffered.
    pub fn has_bytes(&self, n: usize) -> bool {
        self.buf.len() >= n
    }

    /// `true` if the unconsumed prefix starts with `needle`, without
    /// consuming anything. Used to pick which prefix-length cap applies
    /// before a full command line has even arrived.
    pub fn starts_with(&self, needle: &[u8]) -> bool {
        self.buf.starts_with(needle)
    }

    /// The first buffered byte, without consuming it — used once per
    /// connection to sniff which wire protocol a client is speaking (a
    /// binary request's magic byte versus any ascii command's first
    /// printable character).
    pub fn peek_first_byte(&self) -> Option<u8> {
        self.buf.first().copied()
    }

    /// Consume and return exactly `n` bytes. Caller must have checked
    /// [`has_bytes`] first.
    pub fn take_exact(&mut self, n: usize) -> Bytes {
        self.buf.split_to(n).freeze()
    }
}

/// Outbound byte buffer. A thin accumulator: the connection task flushes
/// it to the socket once per batch of processed commands (spec.md §6
/// `tx_chunk_size`, `batch_size`), rather than writing a response at a
/// time.
pub struct TxBuffer {
    buf: BytesMut,
}

impl TxBuffer {
    /// Build an empty buffer pre-sized to one `tx_chunk_size` chunk.
    pub fn new(chunk_size: usize) -> Self {
        TxBuffer {
            buf: BytesMut::with_capacity(chunk_size),
        }
    }

    /// Append raw bytes to the outgoing buffer.
    pub fn write(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes queued for the next flush.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Take everything queued, leaving the buffer empty for reuse.
    pub fn take(&mut self) -> BytesMut {
        std::mem::replace(&mut self.buf, BytesMut::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_line_returns_none_until_terminator_seen() {
        let mut rx = RxBuffer::new(2048);
        rx.inner_mut().extend_from_slice(b"get foo");
        assert!(rx.take_line().is_none());

        rx.inner_mut().extend_from_slice(b"\r\n");
        assert_eq!(rx.take_line().unwrap(), Bytes::from_static(b"get foo"));
        assert!(rx.is_empty());
    }

    #[test]
    fn starts_with_checks_the_unconsumed_prefix() {
        let mut rx = RxBuffer::new(2048);
        rx.inner_mut().extend_from_slice(b"get foo");
        assert!(rx.starts_with(b"get "));
        assert!(!rx.starts_with(b"set "));
    }

    #[test]
    fn take_exact_consumes_precisely_n_bytes() {
        let mut rx = RxBuffer::new(2048);
        rx.inner_mut().extend_from_slice(b"hello\r\nworld");
        let _ = rx.take_line();
        assert!(rx.has_bytes(5));
        assert_eq!(rx.take_exact(5), Bytes::from_static(b"world"));
        assert!(rx.is_empty());
    }
}
