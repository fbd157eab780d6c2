use std::sync::Arc;

#[cfg(test)]
use mockall::automock;
use tracing::info;

use super::FileTxnStore;
use super::MemTxnStore;
use super::SledTxnStore;
use super::TxnEntry;
use crate::Result;
use crate::StorageConfig;
use crate::StorageEngineKind;
use crate::Zxid;

/// Durable home of the transaction log and snapshots.
///
/// Entries are appended in zxid order before they are applied to the tree.
/// Snapshots are opaque blobs produced by [`super::encode_snapshot`].
#[cfg_attr(test, automock)]
pub trait TxnStore: Send + Sync + 'static {
    fn append(
        &self,
        entry: &TxnEntry,
    ) -> Result<()>;

    /// Every persisted entry with a zxid above `after`, in zxid order
    fn replay(
        &self,
        after: Zxid,
    ) -> Result<Vec<TxnEntry>>;

    /// Persists a snapshot covering every entry up to `last_zxid`; the log
    /// continues in a fresh segment and superseded data may be purged.
    fn save_snapshot(
        &self,
        last_zxid: Zxid,
        blob: &[u8],
    ) -> Result<()>;

    /// Newest snapshot as `(last_zxid, blob)`
    fn latest_snapshot(&self) -> Result<Option<(Zxid, Vec<u8>)>>;

    /// Forces buffered appends to stable storage
    fn flush(&self) -> Result<()>;

    fn close(&self) -> Result<()>;
}

/// Opens the engine selected in `config`, creating its directories
pub fn open_txn_store(config: &StorageConfig) -> Result<Arc<dyn TxnStore>> {
    info!(engine = ?config.engine, data_dir = ?config.data_dir, "opening transaction store");
    let store: Arc<dyn TxnStore> = match config.engine {
        StorageEngineKind::File => Arc::new(FileTxnStore::open(
            &config.data_dir,
            &config.log_dir(),
            config.force_sync,
            config.snapshot_retain_count,
        )?),
        StorageEngineKind::Sled => Arc::new(SledTxnStore::open(
            &config.data_dir,
            config.force_sync,
            config.snapshot_retain_count,
        )?),
        StorageEngineKind::Memory => Arc::new(MemTxnStore::new()),
    };
    Ok(store)
}
