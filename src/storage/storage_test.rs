use std::collections::BTreeMap;

use super::*;
use crate::DataTree;
use crate::Error;
use crate::StorageError;
use crate::SystemError;

fn entry(zxid: u64) -> TxnEntry {
    TxnEntry {
        zxid,
        session_id: 7,
        time: 1_000 + zxid,
        txn: Txn::Create {
            path: format!("/n{zxid}"),
            data: vec![zxid as u8; 16],
            ephemeral_owner: 0,
        },
    }
}

fn is_corruption(e: &Error) -> bool {
    matches!(
        e,
        Error::System(SystemError::Storage(StorageError::DataCorruption { .. }))
    )
}

#[test]
fn test_frames_decode_in_order() {
    let mut buf = Vec::new();
    for zxid in 1..=3 {
        buf.extend(encode_txn_frame(&entry(zxid)).unwrap());
    }
    let scan = decode_txn_frames(&buf, "mem").unwrap();
    assert_eq!(scan.entries, vec![entry(1), entry(2), entry(3)]);
    assert_eq!(scan.valid_len, buf.len());
    assert_eq!(scan.torn_bytes, 0);
}

#[test]
fn test_incomplete_tail_is_reported_as_torn() {
    let mut buf = encode_txn_frame(&entry(1)).unwrap();
    let valid = buf.len();
    let second = encode_txn_frame(&entry(2)).unwrap();
    buf.extend_from_slice(&second[..second.len() / 2]);

    let scan = decode_txn_frames(&buf, "mem").unwrap();
    assert_eq!(scan.entries, vec![entry(1)]);
    assert_eq!(scan.valid_len, valid);
    assert_eq!(scan.torn_bytes, second.len() / 2);
}

#[test]
fn test_checksum_mismatch_is_corruption() {
    let mut buf = encode_txn_frame(&entry(1)).unwrap();
    let last = buf.len() - 1;
    buf[last] ^= 0xff;

    let err = decode_txn_frames(&buf, "mem").unwrap_err();
    assert!(is_corruption(&err));
    assert!(err.is_fatal());
}

#[test]
fn test_snapshot_blob_restores_tree_and_sessions() {
    let mut tree = DataTree::new();
    tree.create_node("/a", b"x".to_vec(), 0, 1, 0).unwrap();
    tree.create_node("/a/e", Vec::new(), 9, 2, 0).unwrap();
    let image = SnapshotImage {
        last_zxid: 2,
        tree: tree.clone(),
        sessions: BTreeMap::from([(9, 4_000)]),
    };

    let blob = encode_snapshot(&image).unwrap();
    let restored = decode_snapshot(&blob, "mem").unwrap();
    assert_eq!(restored.last_zxid, 2);
    assert_eq!(restored.sessions, image.sessions);
    assert!(restored.tree.same_state(&tree));
    assert_eq!(restored.tree.ephemerals(9), vec!["/a/e".to_string()]);
}

#[test]
fn test_damaged_snapshot_is_corruption() {
    let image = SnapshotImage {
        last_zxid: 0,
        tree: DataTree::new(),
        sessions: BTreeMap::new(),
    };
    let mut blob = encode_snapshot(&image).unwrap();
    let mid = blob.len() / 2;
    blob[mid] ^= 0x55;

    assert!(is_corruption(&decode_snapshot(&blob, "mem").unwrap_err()));
    assert!(is_corruption(&decode_snapshot(&[1, 2], "mem").unwrap_err()));
}
