//! Registry of queues by name, the owner reverse index, and the
//! pending-creation waiter table.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use crossbeam::channel::Sender;

use super::message::{Origin, QueueName};
use super::queue::{Queue, QueueSnapshot};

/// All queues known to the switch.
///
/// The owner index mirrors each queue's `owner` field; the mutators keep the
/// two in lock-step. The pending-creation table holds wake handles for
/// consumers watching names that do not exist yet; it is purely in-memory
/// and never journalled.
#[derive(Debug, Default)]
pub struct Directory {
    queues: BTreeMap<QueueName, Queue>,
    by_owner: BTreeMap<Origin, BTreeSet<QueueName>>,
    pending_creation: BTreeMap<QueueName, BTreeMap<u64, Sender<()>>>,
    next_creation_token: u64,
}

impl Directory {
    pub fn new() -> Self {
        Directory::default()
    }

    /// Install a queue. Returns false (and changes nothing) when the name is
    /// already taken. On a fresh install every pending-creation waiter for
    /// the name is woken exactly once and dropped from the table.
    pub(crate) fn add(&mut self, owner: Option<Origin>, name: &QueueName) -> bool {
        if self.queues.contains_key(name) {
            return false;
        }
        if let Some(owner) = &owner {
            self.by_owner
                .entry(owner.clone())
                .or_default()
                .insert(name.clone());
        }
        self.queues
            .insert(name.clone(), Queue::make(owner, name.clone()));

        if let Some(waiters) = self.pending_creation.remove(name) {
            for (_token, tx) in waiters {
                let _ = tx.try_send(());
            }
        }
        true
    }

    /// Drop a queue. Returns false when the name is unknown. Waiters on the
    /// queue's condition are not notified; they time out on their own.
    pub(crate) fn remove(&mut self, name: &QueueName) -> bool {
        let Some(queue) = self.queues.remove(name) else {
            return false;
        };
        if let Some(owner) = queue.owner() {
            if let Some(names) = self.by_owner.get_mut(owner) {
                names.remove(name);
                if names.is_empty() {
                    self.by_owner.remove(owner);
                }
            }
        }
        true
    }

    pub fn queue(&self, name: &QueueName) -> Option<&Queue> {
        self.queues.get(name)
    }

    pub(crate) fn queue_mut(&mut self, name: &QueueName) -> Option<&mut Queue> {
        self.queues.get_mut(name)
    }

    /// Snapshot lookup. Unknown names yield an empty snapshot so read paths
    /// need no existence check; nothing is inserted.
    pub fn find(&self, name: &QueueName) -> QueueSnapshot {
        match self.queues.get(name) {
            Some(queue) => queue.snapshot(),
            None => QueueSnapshot::empty(name.clone()),
        }
    }

    /// All queue names starting with `prefix`, in order.
    pub fn list(&self, prefix: &str) -> Vec<QueueName> {
        self.queues
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(name, _)| name.as_str().starts_with(prefix))
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn owned_queues(&self, owner: &Origin) -> BTreeSet<QueueName> {
        self.by_owner.get(owner).cloned().unwrap_or_default()
    }

    pub fn lengths(&self) -> Vec<(QueueName, usize)> {
        self.queues
            .iter()
            .map(|(name, queue)| (name.clone(), queue.len()))
            .collect()
    }

    pub fn measure(&self, name: &QueueName) -> Option<usize> {
        self.queues.get(name).map(Queue::len)
    }

    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }

    /// Register a one-shot wake handle for a name that does not exist yet.
    pub(crate) fn register_creation(&mut self, name: &QueueName, tx: Sender<()>) -> u64 {
        let token = self.next_creation_token;
        self.next_creation_token += 1;
        self.pending_creation
            .entry(name.clone())
            .or_default()
            .insert(token, tx);
        token
    }

    /// Cancel a creation waiter. Removes the table entry so an eventual add
    /// does not wake a dead handle.
    pub(crate) fn deregister_creation(&mut self, name: &QueueName, token: u64) {
        if let Some(waiters) = self.pending_creation.get_mut(name) {
            waiters.remove(&token);
            if waiters.is_empty() {
                self.pending_creation.remove(name);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn creation_waiter_count(&self, name: &QueueName) -> usize {
        self.pending_creation
            .get(name)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    pub(crate) fn queues(&self) -> impl Iterator<Item = &Queue> {
        self.queues.values()
    }

    pub(crate) fn owner_index(&self) -> &BTreeMap<Origin, BTreeSet<QueueName>> {
        &self.by_owner
    }
}
