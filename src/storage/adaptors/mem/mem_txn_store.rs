use parking_lot::Mutex;
use tracing::trace;

use crate::Result;
use crate::TxnEntry;
use crate::TxnStore;
use crate::Zxid;

/// Volatile store: nothing survives the process. Handy for tests and for
/// embedding a throwaway node.
#[derive(Debug, Default)]
pub struct MemTxnStore {
    log: Mutex<Vec<TxnEntry>>,
    snapshot: Mutex<Option<(Zxid, Vec<u8>)>>,
}

impl MemTxnStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.log.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TxnStore for MemTxnStore {
    fn append(
        &self,
        entry: &TxnEntry,
    ) -> Result<()> {
        trace!(zxid = entry.zxid, txn = entry.txn.name(), "append");
        self.log.lock().push(entry.clone());
        Ok(())
    }

    fn replay(
        &self,
        after: Zxid,
    ) -> Result<Vec<TxnEntry>> {
        Ok(self.log.lock().iter().filter(|e| e.zxid > after).cloned().collect())
    }

    fn save_snapshot(
        &self,
        last_zxid: Zxid,
        blob: &[u8],
    ) -> Result<()> {
        *self.snapshot.lock() = Some((last_zxid, blob.to_vec()));
        self.log.lock().retain(|e| e.zxid > last_zxid);
        Ok(())
    }

    fn latest_snapshot(&self) -> Result<Option<(Zxid, Vec<u8>)>> {
        Ok(self.snapshot.lock().clone())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
