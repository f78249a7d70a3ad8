//! Store fixtures shared by unit tests.

use std::path::Path;

use crate::beacon::{round_key, BeaconRecord};
use crate::source::BEACONS;

/// Writes raw key/value pairs into a fresh store at `path`.
pub fn write_pairs(path: &Path, pairs: &[(Vec<u8>, Vec<u8>)]) {
    let db = redb::Database::create(path).unwrap();
    let txn = db.begin_write().unwrap();
    {
        let mut table = txn.open_table(BEACONS).unwrap();
        for (key, value) in pairs {
            table.insert(key.as_slice(), value.as_slice()).unwrap();
        }
    }
    txn.commit().unwrap();
}

/// Writes `count` legacy-encoded records starting at round 1.
pub fn write_legacy_store(path: &Path, count: u64) -> Vec<BeaconRecord> {
    let records = chain(count);
    let pairs: Vec<_> = records
        .iter()
        .map(|r| (round_key(r.round).to_vec(), r.encode_legacy().unwrap()))
        .collect();
    write_pairs(path, &pairs);
    records
}

/// Writes `count` raw-encoded records starting at round 1.
pub fn write_raw_store(path: &Path, count: u64) -> Vec<BeaconRecord> {
    let records = chain(count);
    let pairs: Vec<_> = records
        .iter()
        .map(|r| (round_key(r.round).to_vec(), r.signature.clone()))
        .collect();
    write_pairs(path, &pairs);
    records
}

/// Creates an empty store (table present, no rows).
pub fn write_empty_store(path: &Path) {
    write_pairs(path, &[]);
}

/// Reads every (round, value) pair of a store in key order.
pub fn read_pairs(path: &Path) -> Vec<(u64, Vec<u8>)> {
    use redb::{ReadableDatabase, ReadableTable};

    let db = redb::ReadOnlyDatabase::open(path).unwrap();
    let txn = db.begin_read().unwrap();
    let table = txn.open_table(BEACONS).unwrap();
    table
        .iter()
        .unwrap()
        .map(|entry| {
            let (k, v) = entry.unwrap();
            (
                crate::beacon::round_from_key(k.value()).unwrap(),
                v.value().to_vec(),
            )
        })
        .collect()
}

/// A contiguous chain of records with linked previous signatures.
pub fn chain(count: u64) -> Vec<BeaconRecord> {
    let mut previous = Vec::new();
    (1..=count)
        .map(|round| {
            let signature = format!("sig-{round:08}").into_bytes();
            let record = BeaconRecord {
                previous_signature: previous.clone(),
                round,
                signature: signature.clone(),
            };
            previous = signature;
            record
        })
        .collect()
}
