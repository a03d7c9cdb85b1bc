//! One named FIFO queue and its wake-up machinery.

use std::collections::BTreeMap;
use std::ops::Bound;

use crossbeam::channel::{Sender, TrySendError};

use super::message::{Entry, Message, MessageId, Origin, QueueName};

/// Sequence allocator plus the wake-handle registry for one queue.
///
/// `next_id` only ever moves forward, even across removals, so ids are never
/// reused. Wake handles are broadcast on every append; a handle whose
/// receiver is gone is pruned at broadcast time.
#[derive(Debug, Default)]
pub(crate) struct Waiter {
    pub(crate) next_id: u64,
    next_token: u64,
    wakers: BTreeMap<u64, Sender<()>>,
}

impl Waiter {
    pub(crate) fn register(&mut self, tx: Sender<()>) -> u64 {
        let token = self.next_token;
        self.next_token += 1;
        self.wakers.insert(token, tx);
        token
    }

    pub(crate) fn deregister(&mut self, token: u64) {
        self.wakers.remove(&token);
    }

    pub(crate) fn broadcast(&mut self) {
        let mut dead = Vec::new();
        for (token, tx) in &self.wakers {
            match tx.try_send(()) {
                // Full means the waiter is already signalled; that is enough.
                Ok(()) | Err(TrySendError::Full(())) => {}
                Err(TrySendError::Disconnected(())) => dead.push(*token),
            }
        }
        for token in dead {
            self.wakers.remove(&token);
        }
    }

    #[cfg(test)]
    fn waker_count(&self) -> usize {
        self.wakers.len()
    }
}

/// A named FIFO of entries keyed by sequence number.
///
/// `owner == None` means the queue is persistent; `Some(c)` ties it to
/// connection `c` and marks it for reaping when `c` disappears.
#[derive(Debug)]
pub struct Queue {
    name: QueueName,
    owner: Option<Origin>,
    entries: BTreeMap<u64, Entry>,
    len: usize,
    pub(crate) waiter: Waiter,
}

impl Queue {
    pub(crate) fn make(owner: Option<Origin>, name: QueueName) -> Self {
        Queue {
            name,
            owner,
            entries: BTreeMap::new(),
            len: 0,
            waiter: Waiter::default(),
        }
    }

    pub fn name(&self) -> &QueueName {
        &self.name
    }

    pub fn owner(&self) -> Option<&Origin> {
        self.owner.as_ref()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn next_id(&self) -> u64 {
        self.waiter.next_id
    }

    /// Highest cursor position a consumer could have observed: `next_id - 1`
    /// as a signed value, so a fresh queue reports `-1`.
    pub fn high_cursor(&self) -> i64 {
        self.waiter.next_id as i64 - 1
    }

    /// Reserve the next sequence number. The entry itself is installed by
    /// `append` once the mutation is durable; a failed append leaves a gap.
    pub(crate) fn allocate_id(&mut self) -> u64 {
        let id = self.waiter.next_id;
        self.waiter.next_id += 1;
        id
    }

    /// Install an entry and wake every registered waiter.
    ///
    /// Also ratchets `next_id` past `id`, which is how recovery re-learns
    /// the allocator position from replayed records.
    pub(crate) fn append(&mut self, id: u64, entry: Entry) {
        if self.entries.insert(id, entry).is_none() {
            self.len += 1;
        }
        if id >= self.waiter.next_id {
            self.waiter.next_id = id + 1;
        }
        self.waiter.broadcast();
    }

    pub(crate) fn remove_id(&mut self, id: u64) -> bool {
        if self.entries.remove(&id).is_some() {
            self.len -= 1;
            true
        } else {
            false
        }
    }

    pub fn entry(&self, id: u64) -> Option<&Entry> {
        self.entries.get(&id)
    }

    /// Snapshot of the current entries in id order.
    pub fn contents(&self) -> Vec<(MessageId, Entry)> {
        self.entries
            .iter()
            .map(|(id, entry)| (MessageId::new(self.name.clone(), *id), entry.clone()))
            .collect()
    }

    /// Messages with ids strictly greater than `from`, in id order.
    pub fn messages_after(&self, from: i64) -> Vec<(MessageId, Message)> {
        let lower = if from < 0 {
            Bound::Unbounded
        } else {
            Bound::Excluded(from as u64)
        };
        self.entries
            .range((lower, Bound::Unbounded))
            .map(|(id, entry)| {
                (
                    MessageId::new(self.name.clone(), *id),
                    entry.message.clone(),
                )
            })
            .collect()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            name: self.name.clone(),
            owner: self.owner.clone(),
            next_id: self.waiter.next_id,
            entries: self.contents(),
        }
    }

    pub(crate) fn max_id(&self) -> Option<u64> {
        self.entries.last_key_value().map(|(id, _)| *id)
    }
}

/// Point-in-time copy of a queue, as returned by lookups.
///
/// Lookups of unknown names yield an empty snapshot rather than an error so
/// read paths can proceed without existence checks.
#[derive(Clone, Debug, PartialEq)]
pub struct QueueSnapshot {
    pub name: QueueName,
    pub owner: Option<Origin>,
    pub next_id: u64,
    pub entries: Vec<(MessageId, Entry)>,
}

impl QueueSnapshot {
    pub(crate) fn empty(name: QueueName) -> Self {
        QueueSnapshot {
            name,
            owner: None,
            next_id: 0,
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
