//! The switch facade: named queues behind a write-ahead journal.
//!
//! Every mutation follows one path: build the op, append it to the journal
//! (durable before the call returns), then apply it to the in-memory
//! directory. There is no shortcut that mutates state directly, so the
//! journal's order is the order observers see, and a crash at any point
//! replays into the same state.

pub mod metrics;

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{RecvTimeoutError, bounded};

use crate::Result;
use crate::config::Config;
use crate::core::{
    Applied, Clock, Directory, Entry, Message, MessageId, Op, Origin, QueueName, QueueSnapshot,
    apply_op, check_invariants,
};
use crate::journal::{Journal, JournalStats};
use self::metrics::AppendOutcome;

/// A running message switch.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct Switch {
    inner: Mutex<SwitchState>,
    recovery: JournalStats,
}

struct SwitchState {
    dir: Directory,
    journal: Journal,
    clock: Clock,
}

enum WaitReg {
    Queue { name: QueueName, token: u64 },
    Creation { name: QueueName, token: u64 },
}

impl Switch {
    /// Open the journal, replay it into a fresh directory, and start
    /// accepting work. Replay runs the same reducer as the live path; a
    /// replayed state that contradicts itself fails the open.
    pub fn open(config: &Config) -> Result<Switch> {
        config.validate()?;
        let (journal, ops, stats) = Journal::open(&config.journal)?;

        let mut dir = Directory::new();
        let mut clock = Clock::new();
        for op in &ops {
            if let Op::Send { timestamp_ns, .. } = op {
                clock.observe(*timestamp_ns);
            }
            apply_op(&mut dir, op);
            check_invariants(&dir)?;
        }

        metrics::sink().recovered(
            stats.records_replayed,
            stats.records_dropped,
            dir.queue_count(),
        );
        tracing::info!(
            replayed = stats.records_replayed,
            dropped = stats.records_dropped,
            queues = dir.queue_count(),
            "switch recovered"
        );

        Ok(Switch {
            inner: Mutex::new(SwitchState {
                dir,
                journal,
                clock,
            }),
            recovery: stats,
        })
    }

    /// What recovery found in the journal at open time.
    pub fn recovery_stats(&self) -> &JournalStats {
        &self.recovery
    }

    /// Install a queue. Idempotent; an existing queue keeps its owner.
    pub fn add(&self, owner: Option<&Origin>, name: &QueueName) -> Result<()> {
        let op = Op::Add {
            owner: owner.cloned(),
            name: name.clone(),
        };
        self.state().commit(&op).map(|_| ())
    }

    /// Drop a queue. Idempotent. Waiters on the queue are not notified;
    /// they time out on their own.
    pub fn remove(&self, name: &QueueName) -> Result<()> {
        let op = Op::Remove { name: name.clone() };
        self.state().commit(&op).map(|_| ())
    }

    /// Post a message. Returns `None` without creating anything when the
    /// queue does not exist: producers do not create queues by writing.
    pub fn send(
        &self,
        origin: &Origin,
        name: &QueueName,
        message: Message,
    ) -> Result<Option<MessageId>> {
        let mut state = self.state();
        // Allocate ahead of the append so ids stay dense and monotonic. If
        // the append fails the id is skipped; consumers treat ids as opaque
        // cursors, so gaps are harmless.
        let seq = match state.dir.queue_mut(name) {
            Some(queue) => queue.allocate_id(),
            None => {
                tracing::debug!(queue = %name, "send dropped: no such queue");
                return Ok(None);
            }
        };
        let op = Op::Send {
            origin: origin.clone(),
            name: name.clone(),
            seq,
            timestamp_ns: state.clock.tick(),
            message,
        };
        state.commit(&op)?;
        Ok(Some(MessageId::new(name.clone(), seq)))
    }

    /// Remove one delivered message. Unknown ids are a no-op, so acking
    /// twice is safe.
    pub fn ack(&self, id: &MessageId) -> Result<()> {
        let op = Op::Ack { id: id.clone() };
        self.state().commit(&op).map(|_| ())
    }

    /// All messages with ids strictly greater than `from`, per-queue order
    /// preserved, queues visited in argument order. Pure read.
    pub fn transfer(&self, from: i64, names: &[QueueName]) -> Vec<(MessageId, Message)> {
        let state = self.state();
        let mut out = Vec::new();
        for name in names {
            if let Some(queue) = state.dir.queue(name) {
                out.extend(queue.messages_after(from));
            }
        }
        out
    }

    pub fn entry(&self, id: &MessageId) -> Option<Entry> {
        let state = self.state();
        state
            .dir
            .queue(&id.queue)
            .and_then(|queue| queue.entry(id.seq))
            .cloned()
    }

    /// Block until one of `names` holds a message with an id past `from`,
    /// or such a queue is created, or the timeout elapses. Spurious returns
    /// are allowed; callers re-poll with `transfer`.
    pub fn wait(&self, from: i64, timeout: Duration, names: &[QueueName]) {
        if timeout.is_zero() {
            return;
        }
        let started = Instant::now();
        let (tx, rx) = bounded::<()>(1);
        let mut regs: Vec<WaitReg> = Vec::with_capacity(names.len());
        {
            let mut state = self.state();
            for name in names {
                if let Some(queue) = state.dir.queue(name)
                    && from < queue.high_cursor()
                {
                    return;
                }
            }
            for name in names {
                match state.dir.queue_mut(name) {
                    Some(queue) => regs.push(WaitReg::Queue {
                        name: name.clone(),
                        token: queue.waiter.register(tx.clone()),
                    }),
                    None => regs.push(WaitReg::Creation {
                        name: name.clone(),
                        token: state.dir.register_creation(name, tx.clone()),
                    }),
                }
            }
        }
        drop(tx);

        let remaining = timeout.saturating_sub(started.elapsed());
        match rx.recv_timeout(remaining) {
            Ok(()) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                // Every registration died with its queue. A deleted queue
                // gives no notification; the caller still waits out the
                // clock.
                thread::sleep(timeout.saturating_sub(started.elapsed()));
            }
        }

        let mut state = self.state();
        for reg in regs {
            match reg {
                WaitReg::Queue { name, token } => {
                    if let Some(queue) = state.dir.queue_mut(&name) {
                        queue.waiter.deregister(token);
                    }
                }
                WaitReg::Creation { name, token } => {
                    state.dir.deregister_creation(&name, token);
                }
            }
        }
    }

    /// Snapshot lookup; unknown names yield an empty snapshot.
    pub fn find(&self, name: &QueueName) -> QueueSnapshot {
        self.state().dir.find(name)
    }

    pub fn contents(&self, name: &QueueName) -> Vec<(MessageId, Entry)> {
        self.find(name).entries
    }

    pub fn list(&self, prefix: &str) -> Vec<QueueName> {
        self.state().dir.list(prefix)
    }

    pub fn owned_queues(&self, owner: &Origin) -> BTreeSet<QueueName> {
        self.state().dir.owned_queues(owner)
    }

    /// Drop every queue owned by a vanished connection. Each removal is
    /// journalled on its own; removals are idempotent, so a crash halfway
    /// through just means the rest are reaped on the next call.
    pub fn reap_owner(&self, owner: &Origin) -> Result<()> {
        let names = self.owned_queues(owner);
        for name in names {
            self.remove(&name)?;
        }
        Ok(())
    }

    /// Current (name, length) pairs, in name order.
    pub fn lengths(&self) -> Vec<(QueueName, usize)> {
        self.state().dir.lengths()
    }

    pub fn measure(&self, name: &QueueName) -> Option<usize> {
        self.state().dir.measure(name)
    }

    /// Flush the journal regardless of the fsync policy.
    pub fn sync(&self) -> Result<()> {
        self.state().journal.sync()?;
        Ok(())
    }

    fn state(&self) -> MutexGuard<'_, SwitchState> {
        self.inner.lock().expect("switch state lock poisoned")
    }
}

impl SwitchState {
    /// Journal first, then apply. A failed append leaves the directory
    /// untouched (minus any sequence number the caller already allocated).
    fn commit(&mut self, op: &Op) -> Result<Applied> {
        let append_started = Instant::now();
        if let Err(err) = self.journal.append(op) {
            metrics::sink().journal_append(AppendOutcome::Failed, append_started.elapsed());
            return Err(err.into());
        }
        metrics::sink().journal_append(AppendOutcome::Durable, append_started.elapsed());

        let apply_started = Instant::now();
        let applied = apply_op(&mut self.dir, op);
        metrics::sink().op_applied(apply_started.elapsed());
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JournalConfig;
    use tempfile::TempDir;

    fn open_switch(dir: &TempDir) -> Switch {
        let config = Config {
            journal: JournalConfig {
                path: dir.path().join("switch.journal"),
                capacity_bytes: 1 << 20,
                fsync: false,
            },
        };
        Switch::open(&config).unwrap()
    }

    fn name(s: &str) -> QueueName {
        QueueName::new(s).unwrap()
    }

    #[test]
    fn find_of_unknown_queue_is_empty_and_inserts_nothing() {
        let tmp = TempDir::new().unwrap();
        let switch = open_switch(&tmp);
        let snapshot = switch.find(&name("ghost"));
        assert!(snapshot.is_empty());
        assert!(switch.list("").is_empty());
    }

    #[test]
    fn lengths_track_sends_and_acks() {
        let tmp = TempDir::new().unwrap();
        let switch = open_switch(&tmp);
        let q = name("q");
        let origin = Origin::new("c");
        switch.add(None, &q).unwrap();

        let id = switch.send(&origin, &q, Message::request("x")).unwrap().unwrap();
        assert_eq!(switch.lengths(), vec![(q.clone(), 1)]);
        assert_eq!(switch.measure(&q), Some(1));

        switch.ack(&id).unwrap();
        assert_eq!(switch.measure(&q), Some(0));
        assert_eq!(switch.measure(&name("ghost")), None);
    }

    #[test]
    fn wait_with_zero_timeout_returns_at_once() {
        let tmp = TempDir::new().unwrap();
        let switch = open_switch(&tmp);
        let started = Instant::now();
        switch.wait(-1, Duration::ZERO, &[name("q")]);
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn wait_returns_at_once_when_cursor_is_behind_the_allocator() {
        let tmp = TempDir::new().unwrap();
        let switch = open_switch(&tmp);
        let q = name("q");
        switch.add(None, &q).unwrap();
        let id = switch
            .send(&Origin::new("c"), &q, Message::request("x"))
            .unwrap()
            .unwrap();
        switch.ack(&id).unwrap();

        // The queue is empty, but an id exists past the cursor; the waiter
        // must not block. Callers re-poll and see the empty queue.
        let started = Instant::now();
        switch.wait(-1, Duration::from_secs(5), &[q]);
        assert!(started.elapsed() < Duration::from_millis(200));
    }

    #[test]
    fn wait_times_out_when_nothing_happens() {
        let tmp = TempDir::new().unwrap();
        let switch = open_switch(&tmp);
        let q = name("q");
        switch.add(None, &q).unwrap();

        let timeout = Duration::from_millis(120);
        let started = Instant::now();
        switch.wait(-1, timeout, &[q]);
        assert!(started.elapsed() >= timeout - Duration::from_millis(5));
    }

    #[test]
    fn reply_metadata_is_stored_verbatim() {
        let tmp = TempDir::new().unwrap();
        let switch = open_switch(&tmp);
        let requests = name("requests");
        let replies = name("replies");
        let origin = Origin::new("server");
        switch.add(None, &requests).unwrap();
        switch.add(Some(&Origin::new("client")), &replies).unwrap();

        let request_id = MessageId::new(requests.clone(), 0);
        let id = switch
            .send(&origin, &replies, Message::response(request_id.clone(), "done"))
            .unwrap()
            .unwrap();

        let entry = switch.entry(&id).unwrap();
        assert_eq!(entry.origin, origin);
        assert_eq!(entry.message.reply_to, Some(request_id));
    }
}
