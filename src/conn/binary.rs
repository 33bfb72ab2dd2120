//! Binary protocol parser.
//!
//! Mirrors [`super::ascii::AsciiParser`]'s resumability contract: [`BinaryParser::feed`]
//! either returns a complete [`ParsedCommand`] built from bytes already
//! buffered, or `Ok(None)` meaning the caller should read more and call it
//! again. A 24-byte header is parsed first; if the declared body has not
//! fully arrived yet, the header is remembered in `pending` across calls
//! (spec.md §4.6 "the parser is resumable... records a safepoint").

use bytes::{Buf, BufMut, Bytes};

use crate::conn::buffer::RxBuffer;
use crate::conn::command::{Command, Origin, ParsedCommand, StorageArgs};
use crate::error::ProtocolError;

/// Fixed size of a binary protocol header (spec.md §6).
pub const HEADER_LEN: usize = 24;

/// Request magic byte. Anything else in the first byte of a header trashes
/// the connection (spec.md §4.6, §7).
pub const MAGIC_REQUEST: u8 = 0x80;
/// Response magic byte, used only when framing outgoing headers.
pub const MAGIC_RESPONSE: u8 = 0x81;

/// Upper bound on a single frame's body, guarding against a hostile or
/// corrupt `body_len` demanding an unbounded buffer (spec.md §7 "Protocol"
/// errors / resource exhaustion).
pub const MAX_BODY_LEN: u32 = 16 * 1024 * 1024;

/// Opcodes this server recognizes (spec.md §6's opcode list plus their
/// Q-quiet variants).
pub mod opcode {
    pub const GET: u8 = 0x00;
    pub const SET: u8 = 0x01;
    pub const ADD: u8 = 0x02;
    pub const REPLACE: u8 = 0x03;
    pub const DELETE: u8 = 0x04;
    pub const INCREMENT: u8 = 0x05;
    pub const DECREMENT: u8 = 0x06;
    pub const QUIT: u8 = 0x07;
    pub const FLUSH: u8 = 0x08;
    pub const GETQ: u8 = 0x09;
    pub const NOOP: u8 = 0x0A;
    pub const VERSION: u8 = 0x0B;
    pub const GETK: u8 = 0x0C;
    pub const GETKQ: u8 = 0x0D;
    pub const APPEND: u8 = 0x0E;
    pub const PREPEND: u8 = 0x0F;
    pub const STAT: u8 = 0x10;
    pub const SETQ: u8 = 0x11;
    pub const ADDQ: u8 = 0x12;
    pub const REPLACEQ: u8 = 0x13;
    pub const DELETEQ: u8 = 0x14;
    pub const INCREMENTQ: u8 = 0x15;
    pub const DECREMENTQ: u8 = 0x16;
    pub const QUITQ: u8 = 0x17;
    pub const FLUSHQ: u8 = 0x18;
    pub const APPENDQ: u8 = 0x19;
    pub const PREPENDQ: u8 = 0x1A;
}

/// Binary status codes (spec.md §6).
pub mod status {
    pub const NO_ERROR: u16 = 0x00;
    pub const KEY_NOT_FOUND: u16 = 0x01;
    pub const KEY_EXISTS: u16 = 0x02;
    pub const VALUE_TOO_LARGE: u16 = 0x03;
    pub const INVALID_ARGUMENTS: u16 = 0x04;
    pub const ITEM_NOT_STORED: u16 = 0x05;
    pub const NON_NUMERIC_VALUE: u16 = 0x06;
    pub const UNKNOWN_COMMAND: u16 = 0x81;
    pub const OUT_OF_MEMORY: u16 = 0x82;
}

#[derive(Clone, Copy)]
struct Header {
    opcode: u8,
    key_len: u16,
    ext_len: u8,
    body_len: u32,
    opaque: u32,
    cas: u64,
}

/// Resumable binary command parser, one per connection.
#[derive(Default)]
pub struct BinaryParser {
    pending: Option<Header>,
}

impl BinaryParser {
    /// Build a fresh parser with no partially-read header.
    pub fn new() -> Self {
        BinaryParser { pending: None }
    }

    /// Try to produce one complete command from `rx`. Returns `Ok(None)` if
    /// more bytes are needed. `Err(ProtocolError::Trash(..))` means the
    /// connection must close without a reply; any other `Err` should be
    /// answered with the matching binary status and the connection kept
    /// open.
    pub fn feed(&mut self, rx: &mut RxBuffer) -> Result<Option<ParsedCommand>, ProtocolError> {
        let header = match self.pending {
            Some(header) => header,
            None => {
                if !rx.has_bytes(HEADER_LEN) {
                    return Ok(None);
                }
                let header = parse_header(rx)?;
                if header.body_len > MAX_BODY_LEN {
                    return Err(ProtocolError::Trash(format!(
                        "binary body_len {} exceeds cap {}",
                        header.body_len, MAX_BODY_LEN
                    )));
                }
                header
            }
        };

        if !rx.has_bytes(header.body_len as usize) {
            self.pending = Some(header);
            return Ok(None);
        }
        self.pending = None;

        let ext = rx.take_exact(header.ext_len as usize);
        let key = rx.take_exact(header.key_len as usize);
        let value_len = header.body_len as usize - header.ext_len as usize - header.key_len as usize;
        let value = rx.take_exact(value_len);

        build_command(header, &ext, key, value)
    }
}

fn parse_header(rx: &mut RxBuffer) -> Result<Header, ProtocolError> {
    let raw = rx.take_exact(HEADER_LEN);
    let mut buf = &raw[..];

    let magic = buf.get_u8();
    if magic != MAGIC_REQUEST {
        return Err(ProtocolError::Trash(format!("bad binary magic byte: {magic:#x}")));
    }
    let opcode = buf.get_u8();
    let key_len = buf.get_u16();
    let ext_len = buf.get_u8();
    let _data_type = buf.get_u8();
    let _vbucket_or_status = buf.get_u16();
    let body_len = buf.get_u32();
    let opaque = buf.get_u32();
    let cas = buf.get_u64();

    if (key_len as u32 + ext_len as u32) > body_len {
        return Err(ProtocolError::BinaryFrame {
            opcode,
            opaque,
            status: status::INVALID_ARGUMENTS,
            message: "key/ext longer than body".into(),
        });
    }

    Ok(Header { opcode, key_len, ext_len, body_len, opaque, cas })
}

fn quiet_opcode(opcode: u8) -> bool {
    matches!(
        opcode,
        opcode::GETQ
            | opcode::GETKQ
            | opcode::SETQ
            | opcode::ADDQ
            | opcode::REPLACEQ
            | opcode::DELETEQ
            | opcode::INCREMENTQ
            | opcode::DECREMENTQ
            | opcode::QUITQ
            | opcode::FLUSHQ
            | opcode::APPENDQ
            | opcode::PREPENDQ
    )
}

fn origin(header: &Header, with_key: bool) -> Origin {
    Origin::Binary {
        opcode: header.opcode,
        opaque: header.opaque,
        cas: header.cas,
        quiet: quiet_opcode(header.opcode),
        with_key,
    }
}

fn build_command(
    header: Header,
    mut ext: &[u8],
    key: Bytes,
    value: Bytes,
) -> Result<Option<ParsedCommand>, ProtocolError> {
    let wrap = |command: Command, with_key: bool| Ok(Some(ParsedCommand { command, origin: origin(&header, with_key) }));

    match header.opcode {
        opcode::GET | opcode::GETQ | opcode::GETK | opcode::GETKQ => {
            expect_ext_len(&header, 0)?;
            let with_key = matches!(header.opcode, opcode::GETK | opcode::GETKQ);
            wrap(Command::Get { keys: vec![key], with_cas: true }, with_key)
        }
        opcode::SET | opcode::SETQ | opcode::ADD | opcode::ADDQ | opcode::REPLACE | opcode::REPLACEQ => {
            expect_ext_len(&header, 8)?;
            let flags = ext.get_u32();
            let exptime = ext.get_u32();
            let args = StorageArgs {
                key,
                flags,
                exptime: exptime as i64,
                value,
                cas_token: if header.cas != 0 { Some(header.cas) } else { None },
                noreply: false,
            };
            let command = match header.opcode {
                opcode::SET | opcode::SETQ if header.cas != 0 => Command::Cas(args),
                opcode::SET | opcode::SETQ => Command::Set(args),
                opcode::ADD | opcode::ADDQ => Command::Add(args),
                _ => Command::Replace(args),
            };
            wrap(command, false)
        }
        opcode::APPEND | opcode::APPENDQ | opcode::PREPEND | opcode::PREPENDQ => {
            expect_ext_len(&header, 0)?;
            let args = StorageArgs {
                key,
                flags: 0,
                exptime: 0,
                value,
                cas_token: if header.cas != 0 { Some(header.cas) } else { None },
                noreply: false,
            };
            let command = if matches!(header.opcode, opcode::APPEND | opcode::APPENDQ) {
                Command::Append(args)
            } else {
                Command::Prepend(args)
            };
            wrap(command, false)
        }
        opcode::DELETE | opcode::DELETEQ => {
            expect_ext_len(&header, 0)?;
            wrap(Command::Delete { key, noreply: false }, false)
        }
        opcode::INCREMENT | opcode::INCREMENTQ | opcode::DECREMENT | opcode::DECREMENTQ => {
            expect_ext_len(&header, 20)?;
            let delta = ext.get_u64();
            let initial = ext.get_u64();
            let raw_exptime = ext.get_u32();
            let auto_create = if raw_exptime == 0xFFFF_FFFF {
                None
            } else {
                Some((initial, raw_exptime as i64))
            };
            let command = if matches!(header.opcode, opcode::INCREMENT | opcode::INCREMENTQ) {
                Command::Incr { key, delta, noreply: false, auto_create }
            } else {
                Command::Decr { key, delta, noreply: false, auto_create }
            };
            wrap(command, false)
        }
        opcode::QUIT | opcode::QUITQ => {
            expect_ext_len(&header, 0)?;
            wrap(Command::Quit, false)
        }
        opcode::FLUSH | opcode::FLUSHQ => {
            if header.ext_len != 0 && header.ext_len != 4 {
                return Err(ProtocolError::BinaryFrame {
                    opcode: header.opcode,
                    opaque: header.opaque,
                    status: status::INVALID_ARGUMENTS,
                    message: format!("expects 0 or 4 extras bytes, got {}", header.ext_len),
                });
            }
            let exptime = if header.ext_len == 4 { ext.get_u32() as i64 } else { 0 };
            wrap(Command::FlushAll { exptime, noreply: false }, false)
        }
        opcode::NOOP => {
            expect_ext_len(&header, 0)?;
            wrap(Command::Noop, false)
        }
        opcode::VERSION => {
            expect_ext_len(&header, 0)?;
            wrap(Command::Version, false)
        }
        opcode::STAT => {
            expect_ext_len(&header, 0)?;
            wrap(Command::Stats, false)
        }
        _ => wrap(Command::UnknownOpcode, false),
    }
}

/// Encode a bodiless binary error response. Used by [`crate::conn::Connection`]
/// to answer a [`ProtocolError::BinaryFrame`] without routing it through the
/// executor, since the header never made it far enough to become a `Command`.
pub fn encode_error_frame(opcode: u8, opaque: u32, status: u16, message: &str) -> Vec<u8> {
    let body = message.as_bytes();
    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.put_u8(MAGIC_RESPONSE);
    out.put_u8(opcode);
    out.put_u16(0); // key_len
    out.put_u8(0); // ext_len
    out.put_u8(0); // data_type
    out.put_u16(status);
    out.put_u32(body.len() as u32);
    out.put_u32(opaque);
    out.put_u64(0); // cas
    out.extend_from_slice(body);
    out
}

fn expect_ext_len(header: &Header, expected: u8) -> Result<(), ProtocolError> {
    if header.ext_len != expected {
        Err(ProtocolError::BinaryFrame {
            opcode: header.opcode,
            opaque: header.opaque,
            status: status::INVALID_ARGUMENTS,
            message: format!("expects {} extras bytes, got {}", expected, header.ext_len),
        })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(opcode: u8, key_len: u16, ext_len: u8, body_len: u32, opaque: u32, cas: u64) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN);
        buf.push(MAGIC_REQUEST);
        buf.push(opcode);
        buf.extend_from_slice(&key_len.to_be_bytes());
        buf.push(ext_len);
        buf.push(0); // data_type
        buf.extend_from_slice(&0u16.to_be_bytes()); // vbucket/status
        buf.extend_from_slice(&body_len.to_be_bytes());
        buf.extend_from_slice(&opaque.to_be_bytes());
        buf.extend_from_slice(&cas.to_be_bytes());
        buf
    }

    #[test]
    fn parses_a_get_request() {
        let mut parser = BinaryParser::new();
        let mut rx = RxBuffer::new(4096);
        rx.inner_mut().extend_from_slice(&header_bytes(opcode::GET, 3, 0, 3, 42, 0));
        rx.inner_mut().extend_from_slice(b"foo");

        let parsed = parser.feed(&mut rx).unwrap().unwrap();
        match parsed.command {
            Command::Get { keys, .. } => assert_eq!(&keys[0][..], b"foo"),
            other => panic!("expected Get, got {other:?}"),
        }
        match parsed.origin {
            Origin::Binary { opaque, with_key, .. } => {
                assert_eq!(opaque, 42);
                assert!(!with_key);
            }
            Origin::Ascii => panic!("expected binary origin"),
        }
    }

    #[test]
    fn resumes_across_a_split_body() {
        let mut parser = BinaryParser::new();
        let mut rx = RxBuffer::new(4096);
        let mut header = header_bytes(opcode::SET, 3, 8, 3 + 8 + 5, 0, 0);
        header.extend_from_slice(&0u32.to_be_bytes()); // flags
        header.extend_from_slice(&0u32.to_be_bytes()); // exptime
        header.extend_from_slice(b"foo");
        rx.inner_mut().extend_from_slice(&header);
        assert!(parser.feed(&mut rx).unwrap().is_none());

        rx.inner_mut().extend_from_slice(b"hello");
        let parsed = parser.feed(&mut rx).unwrap().unwrap();
        match parsed.command {
            Command::Set(args) => assert_eq!(&args.value[..], b"hello"),
            other => panic!("expected Set, got {other:?}"),
        }
    }

    #[test]
    fn bad_magic_trashes_the_connection() {
        let mut parser = BinaryParser::new();
        let mut rx = RxBuffer::new(4096);
        let mut header = header_bytes(opcode::GET, 0, 0, 0, 0, 0);
        header[0] = 0x00;
        rx.inner_mut().extend_from_slice(&header);
        assert!(matches!(parser.feed(&mut rx), Err(ProtocolError::Trash(_))));
    }

    #[test]
    fn unknown_opcode_yields_unknown_command() {
        let mut parser = BinaryParser::new();
        let mut rx = RxBuffer::new(4096);
        rx.inner_mut().extend_from_slice(&header_bytes(0x7F, 0, 0, 0, 7, 0));

        let parsed = parser.feed(&mut rx).unwrap().unwrap();
        assert!(matches!(parsed.command, Command::UnknownOpcode));
    }

    #[test]
    fn get_missing_key_on_a_quiet_opcode_is_marked_quiet() {
        let mut parser = BinaryParser::new();
        let mut rx = RxBuffer::new(4096);
        rx.inner_mut().extend_from_slice(&header_bytes(opcode::GETQ, 3, 0, 3, 0, 0));
        rx.inner_mut().extend_from_slice(b"foo");

        let parsed = parser.feed(&mut rx).unwrap().unwrap();
        match parsed.origin {
            Origin::Binary { quiet, .. } => assert!(quiet),
            Origin::Ascii => panic!("expected binary origin"),
        }
    }

    #[test]
    fn wrong_ext_len_yields_a_binary_frame_error_not_ascii() {
        let mut parser = BinaryParser::new();
        let mut rx = RxBuffer::new(4096);
        // SET requires an 8-byte extras (flags+exptime); declare none.
        rx.inner_mut().extend_from_slice(&header_bytes(opcode::SET, 3, 0, 3, 99, 0));
        rx.inner_mut().extend_from_slice(b"foo");

        match parser.feed(&mut rx) {
            Err(ProtocolError::BinaryFrame { opcode, opaque, status, .. }) => {
                assert_eq!(opcode, opcode::SET);
                assert_eq!(opaque, 99);
                assert_eq!(status, status::INVALID_ARGUMENTS);
            }
            other => panic!("expected BinaryFrame, got {other:?}"),
        }
    }

    #[test]
    fn encode_error_frame_round_trips_header_fields() {
        let frame = encode_error_frame(opcode::GET, 7, status::KEY_NOT_FOUND, "nope");
        assert_eq!(frame[0], MAGIC_RESPONSE);
        assert_eq!(frame[1], opcode::GET);
        assert_eq!(u16::from_be_bytes([frame[6], frame[7]]), status::KEY_NOT_FOUND);
        assert_eq!(u32::from_be_bytes([frame[12], frame[13], frame[14], frame[15]]), 4);
        assert_eq!(u32::from_be_bytes([frame[16], frame[17], frame[18], frame[19]]), 7);
        assert_eq!(&frame[HEADER_LEN..], b"nope");
    }

    #[test]
    fn flush_rejects_an_ext_len_other_than_zero_or_four() {
        let mut parser = BinaryParser::new();
        let mut rx = RxBuffer::new(4096);
        rx.inner_mut().extend_from_slice(&header_bytes(opcode::FLUSH, 0, 8, 8, 5, 0));
        rx.inner_mut().extend_from_slice(&[0u8; 8]);

        match parser.feed(&mut rx) {
            Err(ProtocolError::BinaryFrame { opcode, opaque, status, .. }) => {
                assert_eq!(opcode, opcode::FLUSH);
                assert_eq!(opaque, 5);
                assert_eq!(status, status::INVALID_ARGUMENTS);
            }
            other => panic!("expected BinaryFrame, got {other:?}"),
        }
    }
}
