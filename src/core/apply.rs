//! Deterministic Op application into the directory.
//!
//! This is the only code that mutates directory state. The live path runs it
//! right after a journal append succeeds; recovery runs it for every
//! replayed record. Both paths therefore produce identical state from
//! identical op sequences.

use thiserror::Error;

use super::directory::Directory;
use super::message::{Entry, MessageId, QueueName};
use super::op::Op;
use super::queue::Queue;

/// What applying one op did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Applied {
    Added { fresh: bool },
    Removed { existed: bool },
    Acked { existed: bool },
    Sent { id: MessageId },
    /// A send whose queue no longer exists. Possible during replay when an
    /// earlier record was dropped as undecodable.
    SendDropped { name: QueueName },
}

/// A directory state that contradicts itself. Produced only by the replay
/// consistency check; fatal at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApplyError {
    #[error("queue {queue}: id {id} not below allocator position {next_id}")]
    IdBeyondAllocator { queue: QueueName, id: u64, next_id: u64 },

    #[error("queue {queue}: cached length {cached} != actual {actual}")]
    LengthDrift {
        queue: QueueName,
        cached: usize,
        actual: usize,
    },

    #[error("queue {queue} owned by {owner} missing from the owner index")]
    OwnerIndexMissing { queue: QueueName, owner: String },

    #[error("owner index lists {queue} under {owner} but the queue disagrees")]
    OwnerIndexStray { queue: QueueName, owner: String },
}

pub fn apply_op(dir: &mut Directory, op: &Op) -> Applied {
    match op {
        Op::Add { owner, name } => Applied::Added {
            fresh: dir.add(owner.clone(), name),
        },
        Op::Remove { name } => Applied::Removed {
            existed: dir.remove(name),
        },
        Op::Ack { id } => {
            let existed = dir
                .queue_mut(&id.queue)
                .is_some_and(|queue| queue.remove_id(id.seq));
            Applied::Acked { existed }
        }
        Op::Send {
            origin,
            name,
            seq,
            timestamp_ns,
            message,
        } => {
            let Some(queue) = dir.queue_mut(name) else {
                tracing::warn!(queue = %name, seq, "dropping send into unknown queue");
                return Applied::SendDropped { name: name.clone() };
            };
            // The record carries the send-time stamp; replay reproduces the
            // entry byte for byte.
            let entry = Entry {
                timestamp_ns: *timestamp_ns,
                origin: origin.clone(),
                message: message.clone(),
            };
            queue.append(*seq, entry);
            Applied::Sent {
                id: MessageId::new(name.clone(), *seq),
            }
        }
    }
}

/// Cross-check the directory against its own bookkeeping: ids below the
/// allocator, cached lengths, and owner index consistency in both
/// directions.
pub fn check_invariants(dir: &Directory) -> Result<(), ApplyError> {
    for queue in dir.queues() {
        if let Some(max_id) = queue.max_id()
            && max_id >= queue.next_id()
        {
            return Err(ApplyError::IdBeyondAllocator {
                queue: queue.name().clone(),
                id: max_id,
                next_id: queue.next_id(),
            });
        }
        let actual = queue.contents().len();
        if queue.len() != actual {
            return Err(ApplyError::LengthDrift {
                queue: queue.name().clone(),
                cached: queue.len(),
                actual,
            });
        }
        if let Some(owner) = queue.owner()
            && !dir.owned_queues(owner).contains(queue.name())
        {
            return Err(ApplyError::OwnerIndexMissing {
                queue: queue.name().clone(),
                owner: owner.to_string(),
            });
        }
    }

    for (owner, names) in dir.owner_index() {
        for name in names {
            let owned = dir
                .queue(name)
                .and_then(Queue::owner)
                .is_some_and(|actual| actual == owner);
            if !owned {
                return Err(ApplyError::OwnerIndexStray {
                    queue: name.clone(),
                    owner: owner.to_string(),
                });
            }
        }
    }

    Ok(())
}
