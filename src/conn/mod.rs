//! # Connection (C9)
//!
//! One `Connection` per accepted socket: resumable rx/tx buffers, whichever
//! wire parser the first byte selected, and the executor (C10) that turns
//! parsed commands into replies. `Connection::serve` owns the full
//! read → parse → execute → flush loop for one client until EOF, a
//! protocol error severe enough to trash the connection, or `quit`.

pub mod ascii;
pub mod binary;
pub mod buffer;
pub mod command;
pub mod executor;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::cache::Cache;
use crate::epoch::WorkerId;
use crate::error::ProtocolError;

use ascii::AsciiParser;
use binary::{BinaryParser, MAGIC_REQUEST};
use buffer::{RxBuffer, TxBuffer};
use command::ParsedCommand;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Protocol {
    Ascii,
    Binary,
}

/// Per-connection state. Built fresh for every accepted socket.
pub struct Connection {
    rx: RxBuffer,
    tx: TxBuffer,
    ascii: AsciiParser,
    binary: BinaryParser,
    protocol: Option<Protocol>,
    batch_size: u32,
}

impl Connection {
    /// Build a connection using `cache`'s configured chunk sizes and batch
    /// limit.
    pub fn new(cache: &Cache) -> Self {
        Connection {
            rx: RxBuffer::new(cache.config.rx_chunk_size as usize),
            tx: TxBuffer::new(cache.config.tx_chunk_size as usize),
            ascii: AsciiParser::new(),
            binary: BinaryParser::new(),
            protocol: None,
            batch_size: cache.config.batch_size,
        }
    }

    /// Drive the connection to completion: alternates between reading off
    /// the socket and draining as many complete commands as have arrived
    /// (up to `batch_size`), flushing replies once per batch rather than
    /// once per command (spec.md §6 `batch_size`/chunked I/O).
    pub async fn serve(mut self, cache: Arc<Cache>, worker: WorkerId, mut socket: TcpStream) {
        cache.stats.curr_connections.fetch_add(1, Ordering::Relaxed);
        cache.stats.total_connections.fetch_add(1, Ordering::Relaxed);

        let result = self.run(&cache, worker, &mut socket).await;
        if let Err(err) = result {
            log::debug!("connection closed: {err}");
        }

        cache.stats.curr_connections.fetch_sub(1, Ordering::Relaxed);
    }

    async fn run(&mut self, cache: &Arc<Cache>, worker: WorkerId, socket: &mut TcpStream) -> std::io::Result<()> {
        loop {
            self.rx.reserve_chunk();
            let n = socket.read_buf(self.rx.inner_mut()).await?;
            if n == 0 {
                return Ok(()); // EOF
            }

            let mut processed = 0u32;
            loop {
                if processed >= self.batch_size {
                    break;
                }
                match self.next_command() {
                    Ok(Some(parsed)) => {
                        processed += 1;
                        let close = executor::execute(cache, worker, parsed, &mut self.tx).await;
                        if !self.tx.is_empty() {
                            self.flush(socket).await?;
                        }
                        if close {
                            return Ok(());
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        if !self.flush_error(err, socket).await? {
                            return Ok(());
                        }
                        break;
                    }
                }
            }

            if !self.tx.is_empty() {
                self.flush(socket).await?;
            }
        }
    }

    fn next_command(&mut self) -> Result<Option<ParsedCommand>, ProtocolError> {
        let protocol = match self.protocol {
            Some(protocol) => protocol,
            None => match self.rx.peek_first_byte() {
                Some(byte) if byte == MAGIC_REQUEST => {
                    self.protocol = Some(Protocol::Binary);
                    Protocol::Binary
                }
                Some(_) => {
                    self.protocol = Some(Protocol::Ascii);
                    Protocol::Ascii
                }
                None => return Ok(None),
            },
        };

        match protocol {
            Protocol::Ascii => Ok(self.ascii.feed(&mut self.rx)?.map(ParsedCommand::ascii)),
            Protocol::Binary => self.binary.feed(&mut self.rx),
        }
    }

    /// Write back whatever reply a protocol error warrants and report
    /// whether the connection should stay open. `Trash` errors close the
    /// socket immediately without a reply (spec.md §7 "grossly malformed
    /// input... sets `trash` and silently closes the socket"); `BinaryFrame`
    /// errors get a proper binary status frame since they carry the
    /// opcode/opaque the header parsed before rejecting the body; anything
    /// else (ascii `Malformed`/`UnknownCommand`/`FrameTooLarge`) gets the
    /// ascii `ERROR\r\n` line.
    async fn flush_error(&mut self, err: ProtocolError, socket: &mut TcpStream) -> std::io::Result<bool> {
        match err {
            ProtocolError::Trash(reason) => {
                log::warn!("trashing connection: {reason}");
                Ok(false)
            }
            ProtocolError::BinaryFrame { opcode, opaque, status, message } => {
                log::trace!("binary protocol error: {message}");
                let frame = binary::encode_error_frame(opcode, opaque, status, &message);
                self.tx.write(&frame);
                self.flush(socket).await?;
                Ok(true)
            }
            other => {
                log::trace!("protocol error: {other}");
                self.tx.write(b"ERROR\r\n");
                self.flush(socket).await?;
                Ok(true)
            }
        }
    }

    async fn flush(&mut self, socket: &mut TcpStream) -> std::io::Result<()> {
        let out = self.tx.take();
        if !out.is_empty() {
            socket.write_all(&out).await?;
        }
        Ok(())
    }
}
