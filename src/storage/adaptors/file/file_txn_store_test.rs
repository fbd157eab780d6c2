use std::fs::OpenOptions;
use std::io::Write;

use tempfile::TempDir;
use tracing_test::traced_test;

use super::*;
use crate::Error;
use crate::StorageError;
use crate::SystemError;
use crate::Txn;
use crate::TxnEntry;
use crate::TxnStore;

fn set_entry(zxid: u64) -> TxnEntry {
    TxnEntry {
        zxid,
        session_id: 1,
        time: zxid,
        txn: Txn::SetData {
            path: "/a".to_string(),
            data: zxid.to_be_bytes().to_vec(),
            version: zxid as i32,
        },
    }
}

fn open(dir: &TempDir) -> FileTxnStore {
    FileTxnStore::open(dir.path(), &dir.path().join("txnlog"), true, 2).unwrap()
}

#[test]
fn test_open_creates_missing_directories() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileTxnStore::open(
        &dir.path().join("nested/data"),
        &dir.path().join("nested/log"),
        false,
        3,
    )
    .unwrap();
    assert!(store.snap_dir().is_dir());
    assert!(store.log_dir().is_dir());
    assert!(store.log_dir().ends_with("version-2"));
}

#[test]
fn test_entries_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = open(&dir);
        for zxid in 1..=4 {
            store.append(&set_entry(zxid)).unwrap();
        }
        store.close().unwrap();
    }

    let store = open(&dir);
    let replayed = store.replay(0).unwrap();
    assert_eq!(replayed.iter().map(|e| e.zxid).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
    assert_eq!(store.replay(2).unwrap().len(), 2);

    // Appends after a restart go to a new segment
    store.append(&set_entry(5)).unwrap();
    store.close().unwrap();
    assert_eq!(store.log_files().unwrap().len(), 2);
    assert_eq!(open(&dir).replay(0).unwrap().len(), 5);
}

#[test]
#[traced_test]
fn test_torn_tail_is_truncated() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);
    store.append(&set_entry(1)).unwrap();
    store.append(&set_entry(2)).unwrap();
    store.close().unwrap();

    let (_, path) = store.log_files().unwrap().pop().unwrap();
    let intact_len = std::fs::metadata(&path).unwrap().len();
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&[0, 0, 0, 40, 1, 2]).unwrap();
    drop(file);

    let replayed = open(&dir).replay(0).unwrap();
    assert_eq!(replayed.len(), 2);
    assert_eq!(std::fs::metadata(&path).unwrap().len(), intact_len);
    assert!(logs_contain("truncating incomplete frame"));
}

#[test]
fn test_checksum_mismatch_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);
    store.append(&set_entry(1)).unwrap();
    store.close().unwrap();

    let (_, path) = store.log_files().unwrap().pop().unwrap();
    let mut bytes = std::fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    std::fs::write(&path, bytes).unwrap();

    let err = open(&dir).replay(0).unwrap_err();
    assert!(matches!(
        err,
        Error::System(SystemError::Storage(StorageError::DataCorruption { .. }))
    ));
    assert!(err.is_fatal());
}

#[test]
fn test_snapshot_rolls_log_and_purges_old_data() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);
    let mut zxid = 0;
    for round in 0..4u8 {
        for _ in 0..3 {
            zxid += 1;
            store.append(&set_entry(zxid)).unwrap();
        }
        store.save_snapshot(zxid, &[round; 8]).unwrap();
    }
    store.append(&set_entry(zxid + 1)).unwrap();
    store.close().unwrap();

    // Retain count is 2: snapshots at 9 and 12 stay
    let snapshots: Vec<u64> = store.snapshot_files().unwrap().into_iter().map(|(z, _)| z).collect();
    assert_eq!(snapshots, vec![9, 12]);
    assert_eq!(store.latest_snapshot().unwrap(), Some((12, vec![3; 8])));

    // Everything after the oldest kept snapshot is still replayable
    let after_oldest: Vec<u64> = store.replay(9).unwrap().into_iter().map(|e| e.zxid).collect();
    assert_eq!(after_oldest, vec![10, 11, 12, 13]);
    let log_starts: Vec<u64> = store.log_files().unwrap().into_iter().map(|(z, _)| z).collect();
    assert_eq!(log_starts, vec![10, 13]);
}

#[test]
fn test_empty_store_has_nothing_to_load() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);
    assert!(store.replay(0).unwrap().is_empty());
    assert!(store.latest_snapshot().unwrap().is_none());
}
