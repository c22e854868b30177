// Copyright (c) 2026 Emberlink
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

use emberlink::core::queue::ForwardQueue;
use emberlink::core::types::MessageId;

const RETRY_MS: u64 = 30_000;
const MAX_ATTEMPTS: u32 = 20;
const EXPIRY_MS: u64 = 3_600_000;

fn queue() -> ForwardQueue {
    ForwardQueue::new(RETRY_MS, MAX_ATTEMPTS, EXPIRY_MS)
}

#[test]
fn first_attempt_is_one_interval_out() {
    let q = queue();
    let id = MessageId::generate();
    let entry = q
        .enqueue(id, vec![1, 2, 3], 1_000_000, true, 1_000_000)
        .expect("accepted");
    assert_eq!(entry.attempts, 0);
    assert_eq!(entry.next_attempt_ms, 1_000_000 + RETRY_MS);

    // Not due yet.
    assert!(q.drain(1_000_000 + RETRY_MS - 1, true).is_empty());
    // Due exactly at the deadline.
    let due = q.drain(1_000_000 + RETRY_MS, true);
    assert_eq!(due.len(), 1);
    assert!(q.is_empty(), "drain removes entries");
}

#[test]
fn nothing_drains_without_peers() {
    let q = queue();
    q.enqueue(MessageId::generate(), vec![0], 0, true, 0);
    assert!(q.drain(u64::MAX / 2, false).is_empty());
    assert_eq!(q.len(), 1);
}

#[test]
fn requeue_counts_the_attempt_and_bumps_the_deadline() {
    let q = queue();
    q.enqueue(MessageId::generate(), vec![0], 0, true, 0);
    let entry = q.drain(RETRY_MS, true).pop().expect("due");
    let entry = q.requeue(entry, RETRY_MS);
    assert_eq!(entry.attempts, 1);
    assert_eq!(entry.next_attempt_ms, 2 * RETRY_MS);
    assert_eq!(q.len(), 1);
}

#[test]
fn stale_datagrams_are_refused_at_enqueue() {
    let q = queue();
    let accepted = q.enqueue(MessageId::generate(), vec![0], 0, true, EXPIRY_MS + 1);
    assert!(accepted.is_none());
    assert!(q.is_empty());
}

#[test]
fn sweep_discards_expired_entries() {
    let q = queue();
    let old = MessageId::generate();
    let fresh = MessageId::generate();
    q.enqueue(old, vec![0], 0, true, 1_000);
    q.enqueue(fresh, vec![0], EXPIRY_MS, false, EXPIRY_MS + 1_000);

    let discarded = q.sweep(EXPIRY_MS + 2_000);
    assert_eq!(discarded.len(), 1);
    assert_eq!(discarded[0].message_id, old);
    assert!(discarded[0].locally_originated);
    assert_eq!(q.len(), 1);
}

#[test]
fn sweep_discards_over_retried_entries() {
    let q = queue();
    q.enqueue(MessageId::generate(), vec![0], 0, true, 0);
    let mut now = 0;
    for _ in 0..MAX_ATTEMPTS {
        now += RETRY_MS;
        let entry = q.drain(now, true).pop().expect("due");
        q.requeue(entry, now);
    }
    let discarded = q.sweep(now);
    assert_eq!(discarded.len(), 1);
    assert_eq!(discarded[0].attempts, MAX_ATTEMPTS);
    assert!(q.is_empty());
}

#[test]
fn drain_preserves_fifo_order() {
    let q = queue();
    let a = MessageId::generate();
    let b = MessageId::generate();
    q.enqueue(a, vec![0], 0, true, 0);
    q.enqueue(b, vec![1], 0, true, 100);

    let due = q.drain(RETRY_MS + 100, true);
    assert_eq!(due.len(), 2);
    assert_eq!(due[0].message_id, a);
    assert_eq!(due[1].message_id, b);
}

#[test]
fn restore_keeps_scheduling_intact() {
    let q = queue();
    let entry = q
        .enqueue(MessageId::generate(), vec![9], 0, true, 0)
        .expect("accepted");
    q.clear();

    let q2 = queue();
    q2.restore(entry.clone());
    assert_eq!(q2.len(), 1);
    let due = q2.drain(entry.next_attempt_ms, true);
    assert_eq!(due[0].message_id, entry.message_id);
}
