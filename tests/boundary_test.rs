mod common;

use common::setup;
use recordstore::RECORD_SIZE;

#[test]
fn exact_size_value_round_trips_losslessly() {
    let (_dir, _path, mut store) = setup();
    let value = "x".repeat(RECORD_SIZE);
    store.insert_record(&value).unwrap();
    assert_eq!(store.read_record(0).unwrap(), value);
}

#[test]
fn oversized_value_is_silently_truncated() {
    let (_dir, _path, mut store) = setup();
    let value = "x".repeat(RECORD_SIZE + 1);
    store.insert_record(&value).unwrap();
    assert_eq!(store.read_record(0).unwrap(), "x".repeat(RECORD_SIZE));
}

#[test]
fn insert_advances_to_the_next_page_rather_than_splitting_a_record() {
    let (_dir, _path, mut store) = setup();

    for n in 0..40 {
        store.insert_record(&format!("r{}", n)).unwrap();
    }
    assert_eq!(store.page_count().unwrap(), 1);

    // the 41st record cannot fit in the 96 leftover bytes of page 0
    store.insert_record("overflow").unwrap();
    assert_eq!(store.page_count().unwrap(), 2);
    assert_eq!(store.read_record(40).unwrap(), "overflow");

    let page0 = store.get_page(0).unwrap();
    assert_eq!(page0.len(), 40);
}

#[test]
fn get_page_never_returns_more_than_the_remaining_record_count() {
    let (_dir, _path, mut store) = setup();
    for n in 0..45 {
        store.insert_record(&format!("r{}", n)).unwrap();
    }
    assert_eq!(store.get_page(0).unwrap().len(), 40);
    assert_eq!(store.get_page(1).unwrap().len(), 5);
    assert_eq!(store.get_page(2).unwrap().len(), 0);
}

#[test]
fn out_of_bounds_read_is_rejected() {
    let (_dir, _path, mut store) = setup();
    store.insert_record("only one").unwrap();
    assert!(store.read_record(1).is_err());
}
