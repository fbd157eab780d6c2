//! Transaction log and snapshots kept in sled trees.
//!
//! Both trees are keyed by big-endian zxid so iteration order is zxid order.

use std::path::Path;

use sled::Batch;
use sled::Tree;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::constants::SLED_SNAPSHOT_TREE;
use crate::constants::SLED_TXN_LOG_TREE;
use crate::storage::decode_txn_frames;
use crate::encode_txn_frame;
use crate::Result;
use crate::StorageError;
use crate::TxnEntry;
use crate::TxnStore;
use crate::Zxid;

#[derive(Debug)]
pub struct SledTxnStore {
    db: sled::Db,
    log_tree: Tree,
    snapshot_tree: Tree,
    force_sync: bool,
    retain_count: usize,
}

impl SledTxnStore {
    pub fn open(
        data_dir: &Path,
        force_sync: bool,
        retain_count: usize,
    ) -> Result<Self> {
        let db_path = data_dir.join("sled");
        let db = sled::Config::default()
            .path(&db_path)
            .cache_capacity(64 * 1024 * 1024) //64MB
            .use_compression(true)
            .compression_factor(1)
            .open()
            .map_err(|e| {
                warn!("Try to open DB at this location: {:?} and failed: {:?}", db_path, e);
                e
            })?;
        Self::from_db(db, force_sync, retain_count)
    }

    pub fn from_db(
        db: sled::Db,
        force_sync: bool,
        retain_count: usize,
    ) -> Result<Self> {
        let log_tree = db.open_tree(SLED_TXN_LOG_TREE)?;
        let snapshot_tree = db.open_tree(SLED_SNAPSHOT_TREE)?;
        Ok(Self {
            db,
            log_tree,
            snapshot_tree,
            force_sync,
            retain_count: retain_count.max(1),
        })
    }

    #[inline]
    fn zxid_to_key(zxid: Zxid) -> [u8; 8] {
        zxid.to_be_bytes()
    }

    fn key_to_zxid(key: &[u8]) -> Result<Zxid> {
        let bytes: [u8; 8] = key.try_into().map_err(|_| StorageError::DataCorruption {
            location: format!("sled key of length {}", key.len()),
        })?;
        Ok(Zxid::from_be_bytes(bytes))
    }

    pub fn len(&self) -> usize {
        self.log_tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log_tree.is_empty()
    }

    /// Drops old snapshots and every log entry the oldest kept one covers
    fn purge(&self) -> Result<()> {
        let count = self.snapshot_tree.len();
        if count <= self.retain_count {
            return Ok(());
        }
        let mut batch = Batch::default();
        let mut oldest_kept = 0;
        for (idx, item) in self.snapshot_tree.iter().enumerate() {
            let (key, _) = item?;
            if idx < count - self.retain_count {
                batch.remove(key);
            } else {
                oldest_kept = Self::key_to_zxid(&key)?;
                break;
            }
        }
        self.snapshot_tree.apply_batch(batch)?;

        let mut log_batch = Batch::default();
        for item in self.log_tree.range(..=Self::zxid_to_key(oldest_kept)) {
            let (key, _) = item?;
            log_batch.remove(key);
        }
        self.log_tree.apply_batch(log_batch)?;
        debug!(oldest_kept, "purged superseded snapshots and log entries");
        Ok(())
    }
}

impl TxnStore for SledTxnStore {
    fn append(
        &self,
        entry: &TxnEntry,
    ) -> Result<()> {
        let frame = encode_txn_frame(entry)?;
        self.log_tree.insert(Self::zxid_to_key(entry.zxid), frame)?;
        if self.force_sync {
            self.log_tree.flush()?;
        }
        Ok(())
    }

    fn replay(
        &self,
        after: Zxid,
    ) -> Result<Vec<TxnEntry>> {
        let mut entries = Vec::new();
        let start = Self::zxid_to_key(after.saturating_add(1));
        for item in self.log_tree.range(start..) {
            let (key, value) = item?;
            let zxid = Self::key_to_zxid(&key)?;
            let location = format!("sled log entry {zxid}");
            let mut scan = decode_txn_frames(&value, &location)?;
            if scan.torn_bytes > 0 || scan.entries.len() != 1 {
                return Err(StorageError::DataCorruption { location }.into());
            }
            let entry = scan.entries.remove(0);
            if entry.zxid != zxid {
                return Err(StorageError::DataCorruption { location }.into());
            }
            entries.push(entry);
        }
        info!(after, replayed = entries.len(), "sled transaction log scanned");
        Ok(entries)
    }

    fn save_snapshot(
        &self,
        last_zxid: Zxid,
        blob: &[u8],
    ) -> Result<()> {
        self.snapshot_tree.insert(Self::zxid_to_key(last_zxid), blob)?;
        self.snapshot_tree.flush()?;
        info!(last_zxid, bytes = blob.len(), "snapshot stored");
        self.purge()
    }

    fn latest_snapshot(&self) -> Result<Option<(Zxid, Vec<u8>)>> {
        match self.snapshot_tree.last()? {
            Some((key, value)) => Ok(Some((Self::key_to_zxid(&key)?, value.to_vec()))),
            None => Ok(None),
        }
    }

    fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.db.flush()?;
        debug!("sled transaction store closed");
        Ok(())
    }
}
