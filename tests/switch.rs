//! End-to-end scenarios against a real journal file.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use switchboard::{Config, JournalConfig, Message, MessageId, Origin, QueueName, Switch};
use tempfile::TempDir;

fn config(tmp: &TempDir) -> Config {
    Config {
        journal: JournalConfig {
            path: tmp.path().join("switch.journal"),
            capacity_bytes: 1 << 20,
            fsync: false,
        },
    }
}

fn name(s: &str) -> QueueName {
    QueueName::new(s).unwrap()
}

#[test]
fn basic_round_trip() {
    let tmp = TempDir::new().unwrap();
    let switch = Switch::open(&config(&tmp)).unwrap();
    let q = name("q");
    let producer = Origin::new("producer-a");

    switch.add(None, &q).unwrap();
    let id = switch
        .send(&producer, &q, Message::request("m1"))
        .unwrap()
        .unwrap();
    assert_eq!(id, MessageId::new(q.clone(), 0));

    let delivered = switch.transfer(-1, &[q.clone()]);
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].0, id);
    assert_eq!(delivered[0].1, Message::request("m1"));

    switch.ack(&id).unwrap();
    assert!(switch.transfer(-1, &[q]).is_empty());
}

#[test]
fn send_into_missing_queue_is_dropped() {
    let tmp = TempDir::new().unwrap();
    let switch = Switch::open(&config(&tmp)).unwrap();

    let outcome = switch
        .send(&Origin::new("a"), &name("q"), Message::request("m1"))
        .unwrap();
    assert_eq!(outcome, None);
    assert!(switch.list("").is_empty());
}

#[test]
fn owner_reap_leaves_persistent_queues() {
    let tmp = TempDir::new().unwrap();
    let switch = Switch::open(&config(&tmp)).unwrap();
    let conn = Origin::new("c");

    switch.add(Some(&conn), &name("t1")).unwrap();
    switch.add(Some(&conn), &name("t2")).unwrap();
    switch.add(None, &name("p")).unwrap();

    switch.reap_owner(&conn).unwrap();
    assert_eq!(switch.list(""), vec![name("p")]);
    assert!(switch.owned_queues(&conn).is_empty());
}

#[test]
fn ids_stay_monotonic_across_acks() {
    let tmp = TempDir::new().unwrap();
    let switch = Switch::open(&config(&tmp)).unwrap();
    let q = name("q");
    let producer = Origin::new("p");
    switch.add(None, &q).unwrap();

    for expected in 0..3u64 {
        let id = switch
            .send(&producer, &q, Message::request("m"))
            .unwrap()
            .unwrap();
        assert_eq!(id.seq, expected);
    }

    switch.ack(&MessageId::new(q.clone(), 1)).unwrap();
    let id = switch
        .send(&producer, &q, Message::request("m"))
        .unwrap()
        .unwrap();
    assert_eq!(id.seq, 3);
}

#[test]
fn wait_wakes_on_send() {
    let tmp = TempDir::new().unwrap();
    let switch = Arc::new(Switch::open(&config(&tmp)).unwrap());

    let consumer = Arc::clone(&switch);
    let handle = thread::spawn(move || {
        let q = name("q");
        let started = Instant::now();
        let deadline = started + Duration::from_secs(5);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            consumer.wait(-1, remaining, &[q.clone()]);
            let delivered = consumer.transfer(-1, &[q.clone()]);
            if !delivered.is_empty() || Instant::now() >= deadline {
                return (started.elapsed(), delivered);
            }
        }
    });

    thread::sleep(Duration::from_millis(100));
    let q = name("q");
    switch.add(None, &q).unwrap();
    switch
        .send(&Origin::new("b"), &q, Message::request("wake up"))
        .unwrap()
        .unwrap();

    let (elapsed, delivered) = handle.join().unwrap();
    assert!(elapsed < Duration::from_secs(4), "woke after {elapsed:?}");
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].1, Message::request("wake up"));
}

#[test]
fn wait_wakes_on_queue_creation() {
    let tmp = TempDir::new().unwrap();
    let switch = Arc::new(Switch::open(&config(&tmp)).unwrap());

    let watcher = Arc::clone(&switch);
    let handle = thread::spawn(move || {
        let started = Instant::now();
        watcher.wait(0, Duration::from_secs(2), &[name("nope")]);
        started.elapsed()
    });

    thread::sleep(Duration::from_millis(100));
    switch.add(None, &name("nope")).unwrap();

    let elapsed = handle.join().unwrap();
    assert!(
        elapsed < Duration::from_millis(1500),
        "creation wake took {elapsed:?}"
    );
}

#[test]
fn recovery_rebuilds_the_directory_from_the_journal() {
    let tmp = TempDir::new().unwrap();
    let cfg = config(&tmp);
    let conn = Origin::new("conn-9");
    let producer = Origin::new("p");
    let q = name("jobs");
    let t = name("replies/conn-9");

    let (before_transfer, before_q, before_t) = {
        let switch = Switch::open(&cfg).unwrap();
        switch.add(None, &q).unwrap();
        switch.add(Some(&conn), &t).unwrap();
        for body in ["one", "two", "three"] {
            switch.send(&producer, &q, Message::request(body)).unwrap();
        }
        switch
            .send(&producer, &t, Message::request("reply"))
            .unwrap();
        switch.ack(&MessageId::new(q.clone(), 0)).unwrap();
        switch.sync().unwrap();
        (
            switch.transfer(-1, &[q.clone(), t.clone()]),
            switch.contents(&q),
            switch.contents(&t),
        )
    };

    let switch = Switch::open(&cfg).unwrap();
    let stats = switch.recovery_stats();
    assert_eq!(stats.records_dropped, 0);
    assert!(!stats.tail_truncated);
    assert_eq!(stats.records_replayed, 7);

    assert_eq!(switch.transfer(-1, &[q.clone(), t.clone()]), before_transfer);
    // Full entries survive, send-time timestamps included.
    assert_eq!(switch.contents(&q), before_q);
    assert_eq!(switch.contents(&t), before_t);
    assert_eq!(switch.list(""), vec![q.clone(), t.clone()]);
    assert_eq!(
        switch.owned_queues(&conn).into_iter().collect::<Vec<_>>(),
        vec![t.clone()]
    );
    assert_eq!(switch.measure(&q), Some(2));

    // The allocator resumes past every id the journal mentions, and fresh
    // stamps land after every recovered one.
    let max_recovered_ns = before_q
        .iter()
        .chain(before_t.iter())
        .map(|(_, entry)| entry.timestamp_ns)
        .max()
        .unwrap();
    let id = switch
        .send(&producer, &q, Message::request("four"))
        .unwrap()
        .unwrap();
    assert_eq!(id.seq, 3);
    assert!(switch.entry(&id).unwrap().timestamp_ns > max_recovered_ns);
}

#[test]
fn waiter_on_a_removed_queue_waits_out_the_timeout() {
    let tmp = TempDir::new().unwrap();
    let switch = Arc::new(Switch::open(&config(&tmp)).unwrap());
    let q = name("doomed");
    switch.add(None, &q).unwrap();

    let timeout = Duration::from_millis(400);
    let waiter = Arc::clone(&switch);
    let handle = thread::spawn(move || {
        let started = Instant::now();
        waiter.wait(-1, timeout, &[name("doomed")]);
        started.elapsed()
    });

    // Delete the queue out from under the registered waiter. Removal sends
    // no notification, so the waiter must run the clock out rather than
    // return early.
    thread::sleep(Duration::from_millis(100));
    switch.remove(&q).unwrap();

    let elapsed = handle.join().unwrap();
    assert!(
        elapsed >= timeout - Duration::from_millis(10),
        "woke after {elapsed:?}, expected the full {timeout:?}"
    );
}

#[test]
fn wait_timeout_elapses_in_full() {
    let tmp = TempDir::new().unwrap();
    let switch = Switch::open(&config(&tmp)).unwrap();
    let q = name("q");
    switch.add(None, &q).unwrap();

    let timeout = Duration::from_millis(250);
    let started = Instant::now();
    switch.wait(-1, timeout, &[q]);
    assert!(started.elapsed() >= timeout - Duration::from_millis(10));
}

#[test]
fn transfer_respects_the_cursor_per_queue() {
    let tmp = TempDir::new().unwrap();
    let switch = Switch::open(&config(&tmp)).unwrap();
    let a = name("a");
    let b = name("b");
    let producer = Origin::new("p");
    switch.add(None, &a).unwrap();
    switch.add(None, &b).unwrap();

    for body in ["a0", "a1"] {
        switch.send(&producer, &a, Message::request(body)).unwrap();
    }
    switch.send(&producer, &b, Message::request("b0")).unwrap();

    let delivered = switch.transfer(0, &[a.clone(), b.clone()]);
    // Only ids strictly past the cursor qualify: a1 survives, a0 and b0 are
    // behind or at it.
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].0, MessageId::new(a.clone(), 1));
}
