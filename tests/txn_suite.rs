use quartzdb::{
    IsolationLevel, Key, NORMAL_USER_PRIORITY, NodeId, Span, Timestamp, Transaction,
    TransactionStatus, as_intents, make_priority,
};

fn make_txn(name: &str, now: Timestamp) -> Transaction {
    Transaction::new(
        name,
        Key::from("base"),
        NORMAL_USER_PRIORITY,
        IsolationLevel::Serializable,
        now,
        250,
    )
}

#[test]
fn new_transactions_carry_an_uncertainty_window() {
    let now = Timestamp::new(1_000, 2);
    let txn = make_txn("fresh", now);
    assert!(txn.is_initialized());
    assert_eq!(txn.meta.timestamp, now);
    assert_eq!(txn.orig_timestamp, now);
    assert_eq!(txn.max_timestamp, Timestamp::new(1_250, 2));
    assert_eq!(txn.meta.sequence, 1);
    assert_eq!(txn.epoch, 0);
    assert_eq!(txn.status, TransactionStatus::Pending);
}

#[test]
fn higher_priority_wins_most_conflicts() {
    // With the exponential bias, priority 10 should beat priority 1 in
    // roughly 10 out of 11 trials.
    const TRIALS: usize = 1_000;
    let mut wins = 0;
    for _ in 0..TRIALS {
        if make_priority(10.0) > make_priority(1.0) {
            wins += 1;
        }
    }
    let expected = TRIALS as f64 * 10.0 / 11.0;
    assert!(
        (wins as f64 - expected).abs() < 60.0,
        "priority 10 won {wins}/{TRIALS} trials, expected about {expected}"
    );
}

#[test]
fn generated_priorities_stay_in_range() {
    for &user_priority in &[0.0001, 0.5, 1.0, 100.0, 1_000.0, 50_000.0] {
        for _ in 0..128 {
            let p = make_priority(user_priority);
            assert!(p >= 0);
        }
    }
}

#[test]
fn restart_advances_epoch_and_ratchets() {
    let mut txn = make_txn("restarter", Timestamp::new(100, 0));
    txn.write_too_old = true;
    txn.retry_on_push = true;
    let before_priority = txn.meta.priority;

    txn.restart(NORMAL_USER_PRIORITY, before_priority + 10, Timestamp::new(200, 0));
    assert_eq!(txn.epoch, 1);
    assert_eq!(txn.meta.timestamp, Timestamp::new(200, 0));
    assert_eq!(txn.orig_timestamp, Timestamp::new(200, 0));
    assert!(txn.meta.priority >= before_priority + 10);
    assert!(!txn.write_too_old);
    assert!(!txn.retry_on_push);

    // A restart at an older timestamp never moves the clock backward.
    txn.restart(NORMAL_USER_PRIORITY, 0, Timestamp::new(150, 0));
    assert_eq!(txn.epoch, 2);
    assert_eq!(txn.meta.timestamp, Timestamp::new(200, 0));
}

#[test]
fn update_adopts_other_when_uninitialized() {
    let mut local = Transaction::default();
    assert!(!local.is_initialized());

    let mut server = make_txn("authoritative", Timestamp::new(10, 0));
    server.update_observed_timestamp(NodeId(3), Timestamp::new(4, 0));
    server.intents.push(Span::point(Key::from("i")));

    local.update(&server);
    assert_eq!(local, server);

    // The adoption is a deep copy.
    local.update_observed_timestamp(NodeId(8), Timestamp::new(1, 0));
    assert_eq!(server.observed_timestamps.len(), 1);
}

#[test]
fn update_ratchets_toward_the_authoritative_copy() {
    let mut local = make_txn("local", Timestamp::new(100, 0));
    local.meta.key = Key::default();
    local.writing = true;
    local.write_too_old = true;
    local.retry_on_push = true;
    local.meta.priority = 40;
    local.epoch = 2;
    local.meta.sequence = 5;

    let mut server = local.clone();
    server.meta.key = Key::from("adopted");
    server.status = TransactionStatus::Committed;
    server.epoch = 1;
    server.meta.sequence = 9;
    server.meta.priority = 25;
    server.meta.timestamp = Timestamp::new(150, 0);
    server.orig_timestamp = Timestamp::new(90, 0);
    server.max_timestamp = Timestamp::new(400, 0);
    server.last_heartbeat = Some(Timestamp::new(120, 0));
    server.writing = false;
    server.write_too_old = false;
    server.retry_on_push = false;
    server.intents = vec![Span::new(Key::from("a"), Key::from("c"))];

    local.update(&server);

    assert_eq!(local.meta.key, Key::from("adopted"));
    assert_eq!(local.status, TransactionStatus::Committed);
    // Pairwise maxima.
    assert_eq!(local.epoch, 2);
    assert_eq!(local.meta.sequence, 9);
    assert_eq!(local.meta.priority, 40);
    // Forward-only timestamps.
    assert_eq!(local.meta.timestamp, Timestamp::new(150, 0));
    assert_eq!(local.orig_timestamp, Timestamp::new(100, 0));
    assert_eq!(local.max_timestamp, Timestamp::new(400, 0));
    assert_eq!(local.last_heartbeat, Some(Timestamp::new(120, 0)));
    // Writing is OR'd; the retry flags always mirror the incoming record.
    assert!(local.writing);
    assert!(!local.write_too_old);
    assert!(!local.retry_on_push);
    assert_eq!(local.intents, server.intents);
}

#[test]
fn update_keeps_terminal_status_over_pending() {
    let mut local = make_txn("local", Timestamp::new(1, 0));
    local.status = TransactionStatus::Aborted;

    let mut server = local.clone();
    server.status = TransactionStatus::Pending;
    local.update(&server);
    assert_eq!(local.status, TransactionStatus::Aborted);
}

#[test]
fn update_sets_retry_flags_from_the_incoming_record() {
    let mut local = make_txn("local", Timestamp::new(1, 0));
    local.write_too_old = false;
    local.retry_on_push = false;

    let mut server = local.clone();
    server.write_too_old = true;
    server.retry_on_push = true;
    local.update(&server);
    assert!(local.write_too_old);
    assert!(local.retry_on_push);
}

#[test]
fn update_keeps_local_intents_when_other_has_none() {
    let mut local = make_txn("local", Timestamp::new(1, 0));
    local.intents = vec![Span::point(Key::from("mine"))];

    let server = make_txn_like(&local, |t| t.intents.clear());
    local.update(&server);
    assert_eq!(local.intents, vec![Span::point(Key::from("mine"))]);
}

fn make_txn_like(base: &Transaction, mutate: impl FnOnce(&mut Transaction)) -> Transaction {
    let mut other = base.clone();
    mutate(&mut other);
    other
}

#[test]
fn observed_timestamps_keep_the_lowest_reading() {
    let mut txn = make_txn("observer", Timestamp::new(10, 0));
    let node = NodeId(4);
    assert_eq!(txn.get_observed_timestamp(node), None);

    txn.update_observed_timestamp(node, Timestamp::new(7, 0));
    assert_eq!(txn.get_observed_timestamp(node), Some(Timestamp::new(7, 0)));

    // A later, higher reading does not displace the recorded bound.
    txn.update_observed_timestamp(node, Timestamp::new(9, 0));
    assert_eq!(txn.get_observed_timestamp(node), Some(Timestamp::new(7, 0)));

    // A strictly lower one does.
    txn.update_observed_timestamp(node, Timestamp::new(5, 0));
    assert_eq!(txn.get_observed_timestamp(node), Some(Timestamp::new(5, 0)));

    txn.reset_observed_timestamps();
    assert_eq!(txn.get_observed_timestamp(node), None);
}

#[test]
fn update_merges_observed_timestamps_lowest_wins() {
    let mut local = make_txn("local", Timestamp::new(10, 0));
    local.update_observed_timestamp(NodeId(1), Timestamp::new(6, 0));
    local.update_observed_timestamp(NodeId(2), Timestamp::new(3, 0));

    let server = make_txn_like(&local, |t| {
        t.reset_observed_timestamps();
        t.update_observed_timestamp(NodeId(1), Timestamp::new(4, 0));
        t.update_observed_timestamp(NodeId(2), Timestamp::new(8, 0));
        t.update_observed_timestamp(NodeId(3), Timestamp::new(2, 0));
    });

    local.update(&server);
    assert_eq!(
        local.get_observed_timestamp(NodeId(1)),
        Some(Timestamp::new(4, 0))
    );
    assert_eq!(
        local.get_observed_timestamp(NodeId(2)),
        Some(Timestamp::new(3, 0))
    );
    assert_eq!(
        local.get_observed_timestamp(NodeId(3)),
        Some(Timestamp::new(2, 0))
    );
}

#[test]
fn intents_carry_the_transaction_meta() {
    let mut txn = make_txn("writer", Timestamp::new(5, 0));
    txn.status = TransactionStatus::Committed;
    let spans = vec![
        Span::point(Key::from("a")),
        Span::new(Key::from("b"), Key::from("d")),
    ];

    let intents = as_intents(&spans, &txn);
    assert_eq!(intents.len(), 2);
    for (intent, span) in intents.iter().zip(&spans) {
        assert_eq!(&intent.span, span);
        assert_eq!(intent.txn.id, txn.meta.id);
        assert_eq!(intent.status, TransactionStatus::Committed);
    }
}

#[test]
fn display_is_human_readable() {
    let mut txn = make_txn("reporter", Timestamp::new(1_000_000_007, 2));
    txn.meta.priority = i32::MAX / 2;
    let rendered = txn.to_string();
    assert!(rendered.starts_with("\"reporter\" id="));
    assert!(rendered.contains("iso=SERIALIZABLE"));
    assert!(rendered.contains("stat=PENDING"));
    assert!(rendered.contains("ts=1.000000007,2"));
}
