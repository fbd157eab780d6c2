use tempfile::TempDir;

use super::*;
use crate::Txn;
use crate::TxnEntry;
use crate::TxnStore;

fn delete_entry(zxid: u64) -> TxnEntry {
    TxnEntry {
        zxid,
        session_id: 3,
        time: zxid,
        txn: Txn::Delete {
            path: format!("/n{zxid}"),
        },
    }
}

fn setup_store(dir: &TempDir) -> SledTxnStore {
    SledTxnStore::open(dir.path(), false, 1).unwrap()
}

#[test]
fn test_replay_returns_entries_in_zxid_order() {
    let dir = tempfile::tempdir().unwrap();
    let store = setup_store(&dir);
    for zxid in [3, 1, 2, 300] {
        store.append(&delete_entry(zxid)).unwrap();
    }
    let zxids: Vec<u64> = store.replay(0).unwrap().into_iter().map(|e| e.zxid).collect();
    assert_eq!(zxids, vec![1, 2, 3, 300]);
    assert_eq!(store.replay(2).unwrap().len(), 2);
}

#[test]
fn test_snapshot_purges_covered_entries() {
    let dir = tempfile::tempdir().unwrap();
    let store = setup_store(&dir);
    for zxid in 1..=6 {
        store.append(&delete_entry(zxid)).unwrap();
    }
    store.save_snapshot(3, b"first").unwrap();
    store.save_snapshot(5, b"second").unwrap();

    assert_eq!(store.latest_snapshot().unwrap(), Some((5, b"second".to_vec())));
    assert_eq!(store.len(), 1);
    assert_eq!(store.replay(5).unwrap(), vec![delete_entry(6)]);
}

#[test]
fn test_data_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = setup_store(&dir);
        store.append(&delete_entry(1)).unwrap();
        store.save_snapshot(1, b"snap").unwrap();
        store.append(&delete_entry(2)).unwrap();
        store.close().unwrap();
    }
    let store = setup_store(&dir);
    assert_eq!(store.latest_snapshot().unwrap(), Some((1, b"snap".to_vec())));
    assert_eq!(store.replay(1).unwrap(), vec![delete_entry(2)]);
}
