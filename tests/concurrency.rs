//! Shared models under concurrent readers.

mod common;

use std::sync::RwLock;
use std::thread;

use spiece::{EncodeOptions, HandleTable, ModelSource};

const INPUTS: &[&str] = &[
    "the quick brown fox",
    "jumped over the lazy dog",
    "hello world, tokenizing tokens",
    "naïve café 😀",
    "",
];

#[test]
fn test_concurrent_encode_matches_sequential() {
    common::init_tracing();
    let model = common::byte_fallback_model();
    let options = EncodeOptions::with_bos_eos();
    let expected: Vec<Vec<u32>> = INPUTS
        .iter()
        .map(|text| model.encode_as_ids(text, &options))
        .collect();

    thread::scope(|s| {
        for worker in 0..8 {
            let model = model.clone();
            let expected = &expected;
            s.spawn(move || {
                for round in 0..50 {
                    let i = (worker + round) % INPUTS.len();
                    let ids = model.encode_as_ids(INPUTS[i], &options);
                    assert_eq!(ids, expected[i]);
                    assert_eq!(model.decode_from_ids(&ids).unwrap(), model.normalize(INPUTS[i]));
                }
            });
        }
    });
}

#[test]
fn test_handle_table_behind_rwlock() {
    let bytes = common::unk_model().to_bytes().unwrap();
    let table = RwLock::new(HandleTable::new());
    let handle = table.write().unwrap().load(ModelSource::Bytes(&bytes));
    assert!(handle >= 0);

    thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                let guard = table.read().unwrap();
                for _ in 0..25 {
                    let ids = guard.encode(handle, "hello world").unwrap();
                    assert_eq!(guard.decode(handle, &ids).unwrap(), "hello world");
                }
            });
        }
    });

    assert_eq!(table.write().unwrap().unload(handle), 0);
}
