//! Queue names, connection origins, message ids, and stored entries.

use std::borrow::Borrow;
use std::fmt;

use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NameError {
    #[error("queue name cannot be empty")]
    Empty,
}

/// Name of a queue. Unique within a directory.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueueName(String);

impl QueueName {
    pub fn new(name: impl Into<String>) -> Result<Self, NameError> {
        let name = name.into();
        if name.is_empty() {
            return Err(NameError::Empty);
        }
        Ok(QueueName(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for QueueName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Opaque identity of a connection, as handed in by the transport.
///
/// The core records it verbatim (queue ownership, entry provenance) and
/// never inspects it. May be empty.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Origin(String);

impl Origin {
    pub fn new(origin: impl Into<String>) -> Self {
        Origin(origin.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of one message: the queue it lives in plus its sequence number.
///
/// Sequence numbers are allocated per queue, strictly increasing, and never
/// reused, so an id stays unambiguous across acks.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId {
    pub queue: QueueName,
    pub seq: u64,
}

impl MessageId {
    pub fn new(queue: QueueName, seq: u64) -> Self {
        MessageId { queue, seq }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.queue, self.seq)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Response,
}

/// One message as posted by a producer.
///
/// The body and routing metadata are stored verbatim; the core never looks
/// inside them.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub kind: MessageKind,
    pub reply_to: Option<MessageId>,
    pub body: Bytes,
}

impl Message {
    pub fn request(body: impl Into<Bytes>) -> Self {
        Message {
            kind: MessageKind::Request,
            reply_to: None,
            body: body.into(),
        }
    }

    pub fn response(reply_to: MessageId, body: impl Into<Bytes>) -> Self {
        Message {
            kind: MessageKind::Response,
            reply_to: Some(reply_to),
            body: body.into(),
        }
    }
}

/// One stored message: payload plus provenance.
#[derive(Clone, Debug, PartialEq)]
pub struct Entry {
    /// Monotonic nanosecond stamp taken when the send was accepted. Carried
    /// in the journalled record, so it survives recovery unchanged.
    pub timestamp_ns: u64,
    /// Connection that produced the message.
    pub origin: Origin,
    pub message: Message,
}
