//! Journalled mutations and their textual tagged encoding.
//!
//! Every record in the journal is one `Op` in a balanced-parenthesis form,
//! e.g. `(send "conn-3" "orders" 7 1700000000 (req () "payload"))`. The
//! form is self-describing and byte-exact (arbitrary payload bytes are
//! escaped), so journal records stay readable and hand-editable while still
//! round-tripping: `decode(encode(op)) == op`.

use bytes::Bytes;
use thiserror::Error;

use super::message::{Message, MessageId, MessageKind, Origin, QueueName};

/// One journalled mutation.
#[derive(Clone, Debug, PartialEq)]
pub enum Op {
    /// Install a queue. No-op if the name already exists.
    Add {
        owner: Option<Origin>,
        name: QueueName,
    },
    /// Drop a queue. No-op if the name is unknown.
    Remove { name: QueueName },
    /// Remove one message. No-op if the id is unknown.
    Ack { id: MessageId },
    /// Append one message under an already-allocated sequence number.
    ///
    /// The stamp is taken when the send is accepted and travels with the
    /// record, so a replayed entry keeps its original timestamp.
    Send {
        origin: Origin,
        name: QueueName,
        seq: u64,
        timestamp_ns: u64,
        message: Message,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OpDecodeError {
    #[error("unexpected end of record")]
    UnexpectedEnd,

    #[error("unexpected byte {byte:#04x} at offset {offset}")]
    UnexpectedByte { offset: usize, byte: u8 },

    #[error("unknown tag {tag:?}")]
    UnknownTag { tag: String },

    #[error("invalid escape at offset {offset}")]
    InvalidEscape { offset: usize },

    #[error("{field} is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },

    #[error("invalid integer at offset {offset}")]
    InvalidInteger { offset: usize },

    #[error("{field} cannot be empty")]
    EmptyName { field: &'static str },

    #[error("trailing bytes after record")]
    TrailingBytes,
}

impl Op {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        match self {
            Op::Add { owner, name } => {
                out.extend_from_slice(b"(add ");
                push_owner(&mut out, owner.as_ref());
                out.push(b' ');
                push_string(&mut out, name.as_str().as_bytes());
                out.push(b')');
            }
            Op::Remove { name } => {
                out.extend_from_slice(b"(remove ");
                push_string(&mut out, name.as_str().as_bytes());
                out.push(b')');
            }
            Op::Ack { id } => {
                out.extend_from_slice(b"(ack ");
                push_string(&mut out, id.queue.as_str().as_bytes());
                out.push(b' ');
                push_u64(&mut out, id.seq);
                out.push(b')');
            }
            Op::Send {
                origin,
                name,
                seq,
                timestamp_ns,
                message,
            } => {
                out.extend_from_slice(b"(send ");
                push_string(&mut out, origin.as_str().as_bytes());
                out.push(b' ');
                push_string(&mut out, name.as_str().as_bytes());
                out.push(b' ');
                push_u64(&mut out, *seq);
                out.push(b' ');
                push_u64(&mut out, *timestamp_ns);
                out.push(b' ');
                push_message(&mut out, message);
                out.push(b')');
            }
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Op, OpDecodeError> {
        let mut p = Parser::new(bytes);
        p.expect(b'(')?;
        let tag = p.tag()?;
        let op = match tag {
            "add" => {
                let owner = p.owner()?;
                let name = p.queue_name("queue name")?;
                Op::Add { owner, name }
            }
            "remove" => Op::Remove {
                name: p.queue_name("queue name")?,
            },
            "ack" => {
                let queue = p.queue_name("queue name")?;
                let seq = p.u64()?;
                Op::Ack {
                    id: MessageId::new(queue, seq),
                }
            }
            "send" => {
                let origin = p.origin_string("origin")?;
                let name = p.queue_name("queue name")?;
                let seq = p.u64()?;
                let timestamp_ns = p.u64()?;
                let message = p.message()?;
                Op::Send {
                    origin,
                    name,
                    seq,
                    timestamp_ns,
                    message,
                }
            }
            other => {
                return Err(OpDecodeError::UnknownTag {
                    tag: other.to_string(),
                });
            }
        };
        p.expect(b')')?;
        p.finish()?;
        Ok(op)
    }
}

fn push_owner(out: &mut Vec<u8>, owner: Option<&Origin>) {
    match owner {
        None => out.extend_from_slice(b"()"),
        Some(origin) => {
            out.push(b'(');
            push_string(out, origin.as_str().as_bytes());
            out.push(b')');
        }
    }
}

fn push_message(out: &mut Vec<u8>, message: &Message) {
    out.push(b'(');
    out.extend_from_slice(match message.kind {
        MessageKind::Request => b"req",
        MessageKind::Response => b"res",
    });
    out.push(b' ');
    match &message.reply_to {
        None => out.extend_from_slice(b"()"),
        Some(id) => {
            out.push(b'(');
            push_string(out, id.queue.as_str().as_bytes());
            out.push(b' ');
            push_u64(out, id.seq);
            out.push(b')');
        }
    }
    out.push(b' ');
    push_string(out, &message.body);
    out.push(b')');
}

fn push_u64(out: &mut Vec<u8>, value: u64) {
    let mut buf = [0u8; 20];
    let mut i = buf.len();
    let mut v = value;
    loop {
        i -= 1;
        buf[i] = b'0' + (v % 10) as u8;
        v /= 10;
        if v == 0 {
            break;
        }
    }
    out.extend_from_slice(&buf[i..]);
}

/// Quote arbitrary bytes. Printable ASCII passes through; quotes,
/// backslashes, and everything else is escaped so the output stays on one
/// line and round-trips byte-exactly.
fn push_string(out: &mut Vec<u8>, bytes: &[u8]) {
    out.push(b'"');
    for &b in bytes {
        match b {
            b'"' => out.extend_from_slice(b"\\\""),
            b'\\' => out.extend_from_slice(b"\\\\"),
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            b'\t' => out.extend_from_slice(b"\\t"),
            0x20..=0x7e => out.push(b),
            _ => {
                const HEX: &[u8; 16] = b"0123456789abcdef";
                out.extend_from_slice(&[b'\\', b'x', HEX[(b >> 4) as usize], HEX[(b & 0xf) as usize]]);
            }
        }
    }
    out.push(b'"');
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Parser { bytes, pos: 0 }
    }

    fn skip_ws(&mut self) {
        while let Some(&b) = self.bytes.get(self.pos) {
            if b == b' ' || b == b'\t' || b == b'\n' || b == b'\r' {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn peek(&mut self) -> Result<u8, OpDecodeError> {
        self.skip_ws();
        self.bytes
            .get(self.pos)
            .copied()
            .ok_or(OpDecodeError::UnexpectedEnd)
    }

    fn bump(&mut self) -> Result<u8, OpDecodeError> {
        let b = self
            .bytes
            .get(self.pos)
            .copied()
            .ok_or(OpDecodeError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(b)
    }

    fn expect(&mut self, want: u8) -> Result<(), OpDecodeError> {
        let got = self.peek()?;
        if got != want {
            return Err(OpDecodeError::UnexpectedByte {
                offset: self.pos,
                byte: got,
            });
        }
        self.pos += 1;
        Ok(())
    }

    fn tag(&mut self) -> Result<&'a str, OpDecodeError> {
        self.skip_ws();
        let start = self.pos;
        while let Some(&b) = self.bytes.get(self.pos) {
            if b.is_ascii_lowercase() {
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.pos == start {
            let byte = self.peek()?;
            return Err(OpDecodeError::UnexpectedByte {
                offset: self.pos,
                byte,
            });
        }
        // The run is ASCII by construction.
        let bytes = self.bytes;
        Ok(std::str::from_utf8(&bytes[start..self.pos]).expect("ascii tag"))
    }

    fn string(&mut self) -> Result<Vec<u8>, OpDecodeError> {
        self.expect(b'"')?;
        let mut out = Vec::new();
        loop {
            let at = self.pos;
            match self.bump()? {
                b'"' => return Ok(out),
                b'\\' => match self.bump()? {
                    b'"' => out.push(b'"'),
                    b'\\' => out.push(b'\\'),
                    b'n' => out.push(b'\n'),
                    b'r' => out.push(b'\r'),
                    b't' => out.push(b'\t'),
                    b'x' => {
                        let hi = hex_digit(self.bump()?)
                            .ok_or(OpDecodeError::InvalidEscape { offset: at })?;
                        let lo = hex_digit(self.bump()?)
                            .ok_or(OpDecodeError::InvalidEscape { offset: at })?;
                        out.push((hi << 4) | lo);
                    }
                    _ => return Err(OpDecodeError::InvalidEscape { offset: at }),
                },
                b => out.push(b),
            }
        }
    }

    fn u64(&mut self) -> Result<u64, OpDecodeError> {
        self.skip_ws();
        let start = self.pos;
        let mut value: u64 = 0;
        while let Some(&b) = self.bytes.get(self.pos) {
            if b.is_ascii_digit() {
                value = value
                    .checked_mul(10)
                    .and_then(|v| v.checked_add((b - b'0') as u64))
                    .ok_or(OpDecodeError::InvalidInteger { offset: start })?;
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.pos == start {
            return Err(OpDecodeError::InvalidInteger { offset: start });
        }
        Ok(value)
    }

    fn queue_name(&mut self, field: &'static str) -> Result<QueueName, OpDecodeError> {
        let raw = self.string()?;
        let name =
            String::from_utf8(raw).map_err(|_| OpDecodeError::InvalidUtf8 { field })?;
        QueueName::new(name).map_err(|_| OpDecodeError::EmptyName { field })
    }

    fn origin_string(&mut self, field: &'static str) -> Result<Origin, OpDecodeError> {
        let raw = self.string()?;
        let origin =
            String::from_utf8(raw).map_err(|_| OpDecodeError::InvalidUtf8 { field })?;
        Ok(Origin::new(origin))
    }

    fn owner(&mut self) -> Result<Option<Origin>, OpDecodeError> {
        self.expect(b'(')?;
        if self.peek()? == b')' {
            self.pos += 1;
            return Ok(None);
        }
        let origin = self.origin_string("owner")?;
        self.expect(b')')?;
        Ok(Some(origin))
    }

    fn message(&mut self) -> Result<Message, OpDecodeError> {
        self.expect(b'(')?;
        let kind = match self.tag()? {
            "req" => MessageKind::Request,
            "res" => MessageKind::Response,
            other => {
                return Err(OpDecodeError::UnknownTag {
                    tag: other.to_string(),
                });
            }
        };
        self.expect(b'(')?;
        let reply_to = if self.peek()? == b')' {
            self.pos += 1;
            None
        } else {
            let queue = self.queue_name("reply-to queue name")?;
            let seq = self.u64()?;
            self.expect(b')')?;
            Some(MessageId::new(queue, seq))
        };
        let body = Bytes::from(self.string()?);
        self.expect(b')')?;
        Ok(Message {
            kind,
            reply_to,
            body,
        })
    }

    fn finish(&mut self) -> Result<(), OpDecodeError> {
        self.skip_ws();
        if self.pos != self.bytes.len() {
            return Err(OpDecodeError::TrailingBytes);
        }
        Ok(())
    }
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> QueueName {
        QueueName::new(s).unwrap()
    }

    fn roundtrip(op: Op) {
        let encoded = op.encode();
        let decoded = Op::decode(&encoded).unwrap();
        assert_eq!(decoded, op, "encoded form: {:?}", String::from_utf8_lossy(&encoded));
    }

    #[test]
    fn add_roundtrips() {
        roundtrip(Op::Add {
            owner: None,
            name: name("orders"),
        });
        roundtrip(Op::Add {
            owner: Some(Origin::new("conn-17")),
            name: name("replies/conn-17"),
        });
    }

    #[test]
    fn add_with_empty_owner_roundtrips() {
        roundtrip(Op::Add {
            owner: Some(Origin::new("")),
            name: name("q"),
        });
    }

    #[test]
    fn remove_and_ack_roundtrip() {
        roundtrip(Op::Remove { name: name("q") });
        roundtrip(Op::Ack {
            id: MessageId::new(name("q"), u64::MAX),
        });
    }

    #[test]
    fn send_roundtrips_with_hazardous_bytes() {
        let body: Vec<u8> = vec![b'"', b'\\', 0x00, 0x1f, 0x7f, 0xff, b'\n', b'(', b')'];
        roundtrip(Op::Send {
            origin: Origin::new("conn \"quoted\" \\ end"),
            name: name("q\"1"),
            seq: 42,
            timestamp_ns: u64::MAX,
            message: Message {
                kind: MessageKind::Response,
                reply_to: Some(MessageId::new(name("requests"), 3)),
                body: Bytes::from(body),
            },
        });
    }

    #[test]
    fn send_with_empty_body_roundtrips() {
        roundtrip(Op::Send {
            origin: Origin::new(""),
            name: name("q"),
            seq: 0,
            timestamp_ns: 0,
            message: Message::request(""),
        });
    }

    #[test]
    fn encoded_form_is_readable() {
        let op = Op::Send {
            origin: Origin::new("conn-3"),
            name: name("orders"),
            seq: 7,
            timestamp_ns: 1_700_000_000,
            message: Message::request("payload"),
        };
        assert_eq!(
            op.encode(),
            br#"(send "conn-3" "orders" 7 1700000000 (req () "payload"))"#
        );
    }

    #[test]
    fn decode_accepts_extra_whitespace() {
        let op = Op::decode(br#"( add  ( "c" )   "q" )"#).unwrap();
        assert_eq!(
            op,
            Op::Add {
                owner: Some(Origin::new("c")),
                name: name("q"),
            }
        );
    }

    #[test]
    fn decode_rejects_unknown_tag() {
        assert!(matches!(
            Op::decode(br#"(purge "q")"#),
            Err(OpDecodeError::UnknownTag { .. })
        ));
    }

    #[test]
    fn decode_rejects_truncation() {
        let encoded = Op::Remove { name: name("q") }.encode();
        for len in 0..encoded.len() {
            assert!(Op::decode(&encoded[..len]).is_err(), "prefix of {len} bytes");
        }
    }

    #[test]
    fn decode_rejects_trailing_bytes() {
        assert_eq!(
            Op::decode(br#"(remove "q") extra"#),
            Err(OpDecodeError::TrailingBytes)
        );
    }

    #[test]
    fn decode_rejects_bad_escape() {
        assert!(matches!(
            Op::decode(br#"(remove "q\z")"#),
            Err(OpDecodeError::InvalidEscape { .. })
        ));
    }

    #[test]
    fn decode_rejects_empty_queue_name() {
        assert_eq!(
            Op::decode(br#"(remove "")"#),
            Err(OpDecodeError::EmptyName { field: "queue name" })
        );
    }

    #[test]
    fn decode_rejects_non_utf8_queue_name() {
        assert_eq!(
            Op::decode(b"(remove \"\\xff\\xfe\")"),
            Err(OpDecodeError::InvalidUtf8 { field: "queue name" })
        );
    }

    #[test]
    fn decode_rejects_seq_overflow() {
        assert!(matches!(
            Op::decode(br#"(ack "q" 99999999999999999999999)"#),
            Err(OpDecodeError::InvalidInteger { .. })
        ));
    }
}
