//! Ascii protocol parser.
//!
//! A small resumable state machine: [`AsciiParser::feed`] either returns a
//! complete [`Command`] built from bytes already in the buffer, or `Ok(None)`
//! meaning the caller should read more off the socket and call it again.
//! Storage commands are two lines (a header line, then exactly
//! `<bytes>` payload bytes followed by `\r\n`); the parser remembers the
//! header it already parsed in `pending` across calls so a payload that
//! arrives split across reads resumes correctly.

use bytes::Bytes;

use crate::conn::buffer::RxBuffer;
use crate::conn::command::{Command, StorageArgs};
use crate::error::ProtocolError;

/// Longest key the ascii protocol accepts (spec.md §8 boundary behavior:
/// 250 bytes accepted, 251 rejected).
pub const MAX_KEY_LEN: usize = 250;

/// Largest storage value this server will buffer for, mirroring the binary
/// parser's `MAX_BODY_LEN` so neither wire format lets a client force an
/// unbounded allocation by lying about a payload's length (spec.md §7
/// resource exhaustion).
pub const MAX_VALUE_LEN: usize = 16 * 1024 * 1024;

/// Cap on bytes accumulated between commands while no line terminator has
/// arrived yet (spec.md §4.6 "cap consumed prefix bytes per connection
/// between commands... to drop abusive clients"). A `get`/`gets` line can
/// legitimately list many keys, so it gets the wider `GET_FAMILY_LINE_CAP`;
/// every other command line is capped much tighter.
const LINE_CAP: usize = 1024;

/// Prefix-byte cap applied once the buffered line is recognizable as a
/// `get`/`gets` request.
const GET_FAMILY_LINE_CAP: usize = 16 * 1024;

fn check_key_len(key: &[u8]) -> Result<(), ProtocolError> {
    if key.len() > MAX_KEY_LEN {
        Err(ProtocolError::Malformed(format!("key too long: {} bytes", key.len())))
    } else {
        Ok(())
    }
}

#[derive(Clone)]
enum Pending {
    /// Waiting for `bytes + 2` more bytes (payload plus trailing CRLF).
    StorageBody {
        verb: StorageVerb,
        key: Bytes,
        flags: u32,
        exptime: i64,
        cas_token: Option<u64>,
        noreply: bool,
        len: usize,
    },
}

#[derive(Clone, Copy)]
enum StorageVerb {
    Set,
    Add,
    Replace,
    Append,
    Prepend,
    Cas,
}

/// Resumable ascii command parser, one per connection.
#[derive(Default)]
pub struct AsciiParser {
    pending: Option<Pending>,
}

impl AsciiParser {
    /// Build a fresh parser with no partially-read command.
    pub fn new() -> Self {
        AsciiParser { pending: None }
    }

    /// Try to produce one complete command from `rx`. Returns `Ok(None)`
    /// if more bytes are needed.
    pub fn feed(&mut self, rx: &mut RxBuffer) -> Result<Option<Command>, ProtocolError> {
        if let Some(pending) = self.pending.clone() {
            let Pending::StorageBody {
                verb,
                key,
                flags,
                exptime,
                cas_token,
                noreply,
                len,
            } = pending;
            if !rx.has_bytes(len + 2) {
                return Ok(None);
            }
            let body = rx.take_exact(len);
            let trailer = rx.take_exact(2);
            self.pending = None;
            if &trailer[..] != b"\r\n" {
                return Err(ProtocolError::Malformed("storage value missing CRLF terminator".into()));
            }
            let args = StorageArgs {
                key,
                flags,
                exptime,
                value: body,
                cas_token,
                noreply,
            };
            return Ok(Some(verb.into_command(args)));
        }

        let line = match rx.take_line() {
            Some(line) => line,
            None => {
                let cap = if rx.starts_with(b"get ") || rx.starts_with(b"gets ") {
                    GET_FAMILY_LINE_CAP
                } else {
                    LINE_CAP
                };
                if rx.len() > cap {
                    return Err(ProtocolError::Trash(format!(
                        "unterminated command line exceeded {cap} bytes"
                    )));
                }
                return Ok(None);
            }
        };
        self.parse_line(&line, rx)
    }

    fn parse_line(&mut self, line: &[u8], rx: &mut RxBuffer) -> Result<Option<Command>, ProtocolError> {
        let text = std::str::from_utf8(line).map_err(|_| ProtocolError::Malformed("command line is not valid utf-8".into()))?;
        let mut words = text.split_ascii_whitespace();
        let verb = words.next().ok_or_else(|| ProtocolError::Malformed("empty command line".into()))?;

        match verb {
            "get" | "gets" => {
                let keys: Vec<Bytes> = words.map(|w| Bytes::copy_from_slice(w.as_bytes())).collect();
                if keys.is_empty() {
                    return Err(ProtocolError::Malformed("get requires at least one key".into()));
                }
                for key in &keys {
                    check_key_len(key)?;
                }
                Ok(Some(Command::Get { keys, with_cas: verb == "gets" }))
            }
            "set" | "add" | "replace" | "append" | "prepend" | "cas" => {
                self.begin_storage(verb, &mut words)?;
                // Re-enter immediately in case the payload already arrived
                // in the same read.
                self.feed(rx)
            }
            "incr" | "decr" => {
                let key = Bytes::copy_from_slice(next_word(&mut words, "key")?.as_bytes());
                check_key_len(&key)?;
                let delta: u64 = next_word(&mut words, "delta")?
                    .parse()
                    .map_err(|_| ProtocolError::Malformed("delta is not a valid u64".into()))?;
                let noreply = words.next() == Some("noreply");
                Ok(Some(if verb == "incr" {
                    Command::Incr { key, delta, noreply, auto_create: None }
                } else {
                    Command::Decr { key, delta, noreply, auto_create: None }
                }))
            }
            "delete" => {
                let key = Bytes::copy_from_slice(next_word(&mut words, "key")?.as_bytes());
                check_key_len(&key)?;
                let noreply = words.next() == Some("noreply");
                Ok(Some(Command::Delete { key, noreply }))
            }
            "touch" => {
                let key = Bytes::copy_from_slice(next_word(&mut words, "key")?.as_bytes());
                check_key_len(&key)?;
                let exptime: i64 = next_word(&mut words, "exptime")?
                    .parse()
                    .map_err(|_| ProtocolError::Malformed("exptime is not a valid i64".into()))?;
                let noreply = words.next() == Some("noreply");
                Ok(Some(Command::Touch { key, exptime, noreply }))
            }
            "flush_all" => {
                let first = words.next();
                let (exptime, noreply) = match first {
                    Some("noreply") => (0, true),
                    Some(raw) => {
                        let exptime: i64 = raw
                            .parse()
                            .map_err(|_| ProtocolError::Malformed("flush_all delay is not a valid i64".into()))?;
                        (exptime, words.next() == Some("noreply"))
                    }
                    None => (0, false),
                };
                Ok(Some(Command::FlushAll { exptime, noreply }))
            }
            "verbosity" => {
                let level: u32 = next_word(&mut words, "level")?
                    .parse()
                    .map_err(|_| ProtocolError::Malformed("verbosity level is not a valid u32".into()))?;
                let noreply = words.next() == Some("noreply");
                Ok(Some(Command::Verbosity { level, noreply }))
            }
            "stats" => Ok(Some(Command::Stats)),
            "slabs" => Ok(Some(Command::Slabs)),
            "version" => Ok(Some(Command::Version)),
            "quit" => Ok(Some(Command::Quit)),
            other => Err(ProtocolError::UnknownCommand(other.to_string())),
        }
    }

    fn begin_storage<'a, I: Iterator<Item = &'a str>>(&mut self, verb: &str, words: &mut I) -> Result<(), ProtocolError> {
        let key = Bytes::copy_from_slice(next_word(words, "key")?.as_bytes());
        check_key_len(&key)?;
        let flags: u32 = next_word(words, "flags")?
            .parse()
            .map_err(|_| ProtocolError::Malformed("flags is not a valid u32".into()))?;
        let exptime: i64 = next_word(words, "exptime")?
            .parse()
            .map_err(|_| ProtocolError::Malformed("exptime is not a valid i64".into()))?;
        let len: usize = next_word(words, "bytes")?
            .parse()
            .map_err(|_| ProtocolError::Malformed("bytes is not a valid length".into()))?;
        if len > MAX_VALUE_LEN {
            return Err(ProtocolError::FrameTooLarge(len));
        }

        let cas_token = if verb == "cas" {
            Some(
                next_word(words, "cas unique")?
                    .parse()
                    .map_err(|_| ProtocolError::Malformed("cas unique is not a valid u64".into()))?,
            )
        } else {
            None
        };
        let noreply = words.next() == Some("noreply");

        let verb = match verb {
            "set" => StorageVerb::Set,
            "add" => StorageVerb::Add,
            "replace" => StorageVerb::Replace,
            "append" => StorageVerb::Append,
            "prepend" => StorageVerb::Prepend,
            "cas" => StorageVerb::Cas,
            _ => unreachable!("dispatched only for storage verbs"),
        };

        self.pending = Some(Pending::StorageBody {
            verb,
            key,
            flags,
            exptime,
            cas_token,
            noreply,
            len,
        });
        Ok(())
    }
}

impl StorageVerb {
    fn into_command(self, args: StorageArgs) -> Command {
        match self {
            StorageVerb::Set => Command::Set(args),
            StorageVerb::Add => Command::Add(args),
            StorageVerb::Replace => Command::Replace(args),
            StorageVerb::Append => Command::Append(args),
            StorageVerb::Prepend => Command::Prepend(args),
            StorageVerb::Cas => Command::Cas(args),
        }
    }
}

fn next_word<'a, I: Iterator<Item = &'a str>>(words: &mut I, what: &'static str) -> Result<&'a str, ProtocolError> {
    words.next().ok_or(ProtocolError::Malformed(format!("missing {what}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_complete_set_in_one_feed() {
        let mut parser = AsciiParser::new();
        let mut rx = RxBuffer::new(2048);
        rx.inner_mut().extend_from_slice(b"set foo 0 0 3\r\nbar\r\n");

        let cmd = parser.feed(&mut rx).unwrap().unwrap();
        match cmd {
            Command::Set(args) => {
                assert_eq!(&args.key[..], b"foo");
                assert_eq!(&args.value[..], b"bar");
            }
            other => panic!("expected Set, got {other:?}"),
        }
    }

    #[test]
    fn resumes_across_a_split_payload() {
        let mut parser = AsciiParser::new();
        let mut rx = RxBuffer::new(2048);
        rx.inner_mut().extend_from_slice(b"set foo 0 0 3\r\nba");
        assert!(parser.feed(&mut rx).unwrap().is_none());

        rx.inner_mut().extend_from_slice(b"r\r\n");
        let cmd = parser.feed(&mut rx).unwrap().unwrap();
        match cmd {
            Command::Set(args) => assert_eq!(&args.value[..], b"bar"),
            other => panic!("expected Set, got {other:?}"),
        }
    }

    #[test]
    fn parses_multi_key_get() {
        let mut parser = AsciiParser::new();
        let mut rx = RxBuffer::new(2048);
        rx.inner_mut().extend_from_slice(b"get a b c\r\n");
        match parser.feed(&mut rx).unwrap().unwrap() {
            Command::Get { keys, with_cas } => {
                assert_eq!(keys.len(), 3);
                assert!(!with_cas);
            }
            other => panic!("expected Get, got {other:?}"),
        }
    }

    #[test]
    fn unknown_verb_is_an_error() {
        let mut parser = AsciiParser::new();
        let mut rx = RxBuffer::new(2048);
        rx.inner_mut().extend_from_slice(b"frobnicate foo\r\n");
        assert!(parser.feed(&mut rx).is_err());
    }

    #[test]
    fn key_of_250_bytes_is_accepted_251_is_rejected() {
        let key250 = "k".repeat(250);
        let mut parser = AsciiParser::new();
        let mut rx = RxBuffer::new(4096);
        rx.inner_mut().extend_from_slice(format!("get {key250}\r\n").as_bytes());
        assert!(parser.feed(&mut rx).unwrap().is_some());

        let key251 = "k".repeat(251);
        let mut parser = AsciiParser::new();
        let mut rx = RxBuffer::new(4096);
        rx.inner_mut().extend_from_slice(format!("get {key251}\r\n").as_bytes());
        assert!(parser.feed(&mut rx).is_err());
    }

    #[test]
    fn bare_lf_terminates_a_command_line() {
        let mut parser = AsciiParser::new();
        let mut rx = RxBuffer::new(2048);
        rx.inner_mut().extend_from_slice(b"get foo\n");
        match parser.feed(&mut rx).unwrap().unwrap() {
            Command::Get { keys, .. } => assert_eq!(keys.len(), 1),
            other => panic!("expected Get, got {other:?}"),
        }
    }

    #[test]
    fn oversized_storage_length_is_rejected() {
        let mut parser = AsciiParser::new();
        let mut rx = RxBuffer::new(4096);
        rx.inner_mut().extend_from_slice(format!("set k 0 0 {}\r\n", MAX_VALUE_LEN + 1).as_bytes());
        assert!(matches!(parser.feed(&mut rx), Err(ProtocolError::FrameTooLarge(_))));
    }

    #[test]
    fn unterminated_line_past_the_cap_trashes_the_connection() {
        let mut parser = AsciiParser::new();
        let mut rx = RxBuffer::new(4096);
        rx.inner_mut().extend_from_slice(&vec![b'x'; LINE_CAP + 1]);
        assert!(matches!(parser.feed(&mut rx), Err(ProtocolError::Trash(_))));
    }

    #[test]
    fn unterminated_line_under_the_cap_just_waits_for_more() {
        let mut parser = AsciiParser::new();
        let mut rx = RxBuffer::new(4096);
        rx.inner_mut().extend_from_slice(&vec![b'x'; LINE_CAP]);
        assert!(parser.feed(&mut rx).unwrap().is_none());
    }

    #[test]
    fn unterminated_get_family_line_gets_the_wider_cap() {
        let mut parser = AsciiParser::new();
        let mut rx = RxBuffer::new(32 * 1024);
        let mut line = b"get ".to_vec();
        line.extend(std::iter::repeat(b'x').take(LINE_CAP + 1));
        rx.inner_mut().extend_from_slice(&line);
        // Past the plain-command cap but still under the get-family cap.
        assert!(parser.feed(&mut rx).unwrap().is_none());
    }

    #[test]
    fn unterminated_get_family_line_past_its_wider_cap_trashes_the_connection() {
        let mut parser = AsciiParser::new();
        let mut rx = RxBuffer::new(32 * 1024);
        let mut line = b"get ".to_vec();
        line.extend(std::iter::repeat(b'x').take(GET_FAMILY_LINE_CAP + 1));
        rx.inner_mut().extend_from_slice(&line);
        assert!(matches!(parser.feed(&mut rx), Err(ProtocolError::Trash(_))));
    }

    #[test]
    fn flush_all_parses_optional_delay() {
        let mut parser = AsciiParser::new();
        let mut rx = RxBuffer::new(2048);
        rx.inner_mut().extend_from_slice(b"flush_all 30\r\n");
        match parser.feed(&mut rx).unwrap().unwrap() {
            Command::FlushAll { exptime, noreply } => {
                assert_eq!(exptime, 30);
                assert!(!noreply);
            }
            other => panic!("expected FlushAll, got {other:?}"),
        }
    }
}
