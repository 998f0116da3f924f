mod common;

use common::setup;
use rand::prelude::*;

/// Property 1: every inserted value reads back at the id it was inserted at.
#[test]
fn inserted_values_read_back_at_their_id() {
    let (_dir, _path, mut store) = setup();
    let mut rng = rand::thread_rng();

    let n: usize = rng.gen_range(1, 200);
    let values: Vec<String> = (0..n).map(|i| format!("row-{}-{}", i, rng.gen::<u32>())).collect();
    for v in &values {
        store.insert_record(v).unwrap();
    }

    for (i, v) in values.iter().enumerate() {
        assert_eq!(&store.read_record(i as u64).unwrap(), v);
    }
}

/// Property 2: record_count() never decreases across inserts and commits.
#[test]
fn record_count_is_monotonic_outside_rollback() {
    let (_dir, _path, mut store) = setup();
    let mut rng = rand::thread_rng();

    let mut last = store.record_count().unwrap();
    for _ in 0..50 {
        if rng.gen_bool(0.3) {
            store.begin().unwrap();
            store.insert_record("x").unwrap();
            store.commit().unwrap();
        } else {
            store.insert_record("y").unwrap();
        }
        let current = store.record_count().unwrap();
        assert!(current >= last);
        last = current;
    }
}

/// Property 3: after a run of begin/insert/commit transactions, the final
/// count equals the total number of inserts across all of them.
#[test]
fn record_count_after_commits_equals_total_committed_inserts() {
    let (_dir, _path, mut store) = setup();
    let mut rng = rand::thread_rng();

    let txn_count: usize = rng.gen_range(1, 10);
    let mut total = 0u64;
    for _ in 0..txn_count {
        store.begin().unwrap();
        let inserts: usize = rng.gen_range(1, 5);
        for _ in 0..inserts {
            store.insert_record("row").unwrap();
            total += 1;
        }
        store.commit().unwrap();
    }

    assert_eq!(store.record_count().unwrap(), total);
}

/// Property 4: a transaction's rollback restores record_count() to its
/// pre-begin value, no matter how many records it inserted.
#[test]
fn rollback_restores_pre_transaction_count() {
    let (_dir, _path, mut store) = setup();
    let mut rng = rand::thread_rng();

    for _ in 0..rng.gen_range(0, 5) {
        store.insert_record("seed").unwrap();
    }
    let before = store.record_count().unwrap();

    store.begin().unwrap();
    for _ in 0..rng.gen_range(1, 20) {
        store.insert_record("doomed").unwrap();
    }
    store.rollback().unwrap();

    assert_eq!(store.record_count().unwrap(), before);
}

/// Property 5: inside an active transaction, reading back a record it has
/// itself written yields the pre-transaction value, empty if the slot was
/// untouched at the start of the transaction.
#[test]
fn transactional_reads_see_the_pre_transaction_value() {
    let (_dir, _path, mut store) = setup();

    store.insert_record("seed-0").unwrap();
    store.insert_record("seed-1").unwrap();

    store.begin().unwrap();
    store.update_record(0, "new-0").unwrap();
    store.insert_record("new-2").unwrap(); // id 2 was untouched before the transaction began

    assert_eq!(store.read_record(0).unwrap(), "seed-0");
    assert_eq!(store.read_record(2).unwrap(), "");
    store.rollback().unwrap();
}

/// Property 6: crash+recover with a log of wholly committed transactions
/// plus one uncommitted suffix reflects exactly the committed effects.
#[test]
fn crash_recover_reflects_exactly_the_committed_prefix() {
    let (_dir, _path, mut store) = setup();
    let mut rng = rand::thread_rng();

    let committed_txns: usize = rng.gen_range(1, 6);
    let mut committed_values = Vec::new();
    for t in 0..committed_txns {
        store.begin().unwrap();
        let inserts: usize = rng.gen_range(1, 4);
        for i in 0..inserts {
            let value = format!("committed-{}-{}", t, i);
            store.insert_record(&value).unwrap();
            committed_values.push(value);
        }
        store.commit().unwrap();
    }

    store.begin().unwrap();
    store.insert_record("never-committed").unwrap();
    // no commit, no rollback: the process dies here

    store.crash().unwrap();
    store.recover().unwrap();

    assert_eq!(store.record_count().unwrap(), committed_values.len() as u64);
    for (i, value) in committed_values.iter().enumerate() {
        assert_eq!(&store.read_record(i as u64).unwrap(), value);
    }
}
