//! Committed state of the node: the tree, the persisted session table and
//! the write path that keeps them in step with the transaction log.
//!
//! Writers are serialised by a commit lock. A commit validates against the
//! current state, appends the entry to the log, applies it under the state
//! write lock while taking the triggered watches out of the registry, then
//! delivers those events before the next commit may start. Events therefore
//! reach sessions in mutation order, and never before the change is readable.

use std::collections::BTreeMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use parking_lot::RwLock;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::decode_snapshot;
use crate::encode_snapshot;
use crate::utils::time::now_millis;
use crate::DataTree;
use crate::Error;
use crate::EventSink;
use crate::KeeperError;
use crate::Result;
use crate::SessionId;
use crate::SnapshotImage;
use crate::Stat;
use crate::Txn;
use crate::TxnEntry;
use crate::TxnStore;
use crate::WatchManager;
use crate::WatchTrigger;
use crate::Zxid;

/// Everything a snapshot captures
#[derive(Debug, Default)]
pub struct DatabaseState {
    pub tree: DataTree,
    /// Sessions known to the log, with their negotiated timeouts
    pub sessions: BTreeMap<SessionId, u64>,
}

/// Result of applying one transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    SessionCreated,
    SessionClosed {
        /// Ephemeral paths removed with the session
        removed: Vec<String>,
    },
    Created {
        path: String,
        stat: Stat,
    },
    Deleted,
    DataSet {
        stat: Stat,
    },
}

#[derive(Debug)]
pub struct Committed {
    pub zxid: Zxid,
    pub applied: Applied,
    /// Watch events delivered by this commit
    pub fired: usize,
}

/// What `load` found on disk
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadSummary {
    pub snapshot_zxid: Option<Zxid>,
    pub replayed: usize,
    pub last_zxid: Zxid,
    /// Sessions alive in the recovered state
    pub sessions: BTreeMap<SessionId, u64>,
}

pub struct KeeperDatabase {
    state: RwLock<DatabaseState>,
    commit_lock: Mutex<()>,
    last_zxid: AtomicU64,
    txns_since_snapshot: AtomicU64,
    snap_count: u64,
    store: Arc<dyn TxnStore>,
    watches: Arc<WatchManager>,
}

impl std::fmt::Debug for KeeperDatabase {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("KeeperDatabase")
            .field("last_zxid", &self.last_zxid())
            .field("snap_count", &self.snap_count)
            .finish_non_exhaustive()
    }
}

impl KeeperDatabase {
    pub fn new(
        store: Arc<dyn TxnStore>,
        watches: Arc<WatchManager>,
        snap_count: u64,
    ) -> Self {
        Self {
            state: RwLock::new(DatabaseState::default()),
            commit_lock: Mutex::new(()),
            last_zxid: AtomicU64::new(0),
            txns_since_snapshot: AtomicU64::new(0),
            snap_count: snap_count.max(1),
            store,
            watches,
        }
    }

    /// Rebuilds state from the newest snapshot plus the log entries after it.
    ///
    /// Any corruption found on the way is `Fatal`: the node must not serve a
    /// state it cannot reproduce.
    pub fn load(&self) -> Result<LoadSummary> {
        let _commit = self.commit_lock.lock();

        let mut summary = LoadSummary::default();
        let mut state = DatabaseState::default();
        if let Some((zxid, blob)) = self.store.latest_snapshot().map_err(fatal)? {
            let image = decode_snapshot(&blob, &format!("snapshot {zxid:#x}")).map_err(fatal)?;
            info!(last_zxid = image.last_zxid, nodes = image.tree.node_count(), "snapshot loaded");
            state.tree = image.tree;
            state.sessions = image.sessions;
            summary.snapshot_zxid = Some(image.last_zxid);
            summary.last_zxid = image.last_zxid;
        }

        let entries = self.store.replay(summary.last_zxid).map_err(fatal)?;
        for entry in &entries {
            if entry.zxid <= summary.last_zxid {
                return Err(Error::Fatal(format!(
                    "log entry {} replayed out of order after {}",
                    entry.zxid, summary.last_zxid
                )));
            }
            if let Err(e) = apply_txn(&mut state, entry) {
                error!(zxid = entry.zxid, txn = entry.txn.name(), "replay failed: {}", e);
                return Err(Error::Fatal(format!(
                    "log entry {} ({}) cannot be applied: {}",
                    entry.zxid,
                    entry.txn.name(),
                    e
                )));
            }
            summary.last_zxid = entry.zxid;
        }
        summary.replayed = entries.len();
        summary.sessions = state.sessions.clone();

        *self.state.write() = state;
        self.last_zxid.store(summary.last_zxid, Ordering::SeqCst);
        self.txns_since_snapshot.store(summary.replayed as u64, Ordering::SeqCst);
        info!(
            last_zxid = summary.last_zxid,
            replayed = summary.replayed,
            sessions = summary.sessions.len(),
            "state recovered"
        );
        Ok(summary)
    }

    /// Validates, logs, applies and fires one change.
    ///
    /// `prepare` sees the current state and either builds the transaction or
    /// rejects the request; a rejection leaves no trace in the log or tree.
    pub fn commit<F>(
        &self,
        session_id: SessionId,
        sink: &dyn EventSink,
        prepare: F,
    ) -> Result<Committed>
    where
        F: FnOnce(&DatabaseState) -> std::result::Result<Txn, KeeperError>,
    {
        let _commit = self.commit_lock.lock();

        let txn = prepare(&self.state.read())?;
        let entry = TxnEntry {
            zxid: self.last_zxid() + 1,
            session_id,
            time: now_millis(),
            txn,
        };
        self.store.append(&entry)?;

        let (applied, firing) = {
            let mut state = self.state.write();
            let (applied, triggers) = match apply_txn(&mut state, &entry) {
                Ok(outcome) => outcome,
                Err(e) => {
                    // Validation ran against this exact state, so the log now
                    // holds an entry the tree rejects.
                    return Err(Error::Fatal(format!(
                        "logged entry {} ({}) failed to apply: {}",
                        entry.zxid,
                        entry.txn.name(),
                        e
                    )));
                }
            };
            if matches!(entry.txn, Txn::CloseSession) {
                self.watches.remove_session(session_id);
            }
            (applied, self.watches.take_triggered(&triggers))
        };
        self.last_zxid.store(entry.zxid, Ordering::SeqCst);

        let fired = self.watches.deliver(firing, sink);
        debug!(zxid = entry.zxid, txn = entry.txn.name(), session_id, fired, "committed");

        if self.txns_since_snapshot.fetch_add(1, Ordering::SeqCst) + 1 >= self.snap_count {
            if let Err(e) = self.take_snapshot_locked() {
                warn!("snapshot after zxid {} failed: {}", entry.zxid, e);
            }
        }

        Ok(Committed {
            zxid: entry.zxid,
            applied,
            fired,
        })
    }

    /// Runs `f` against a consistent view; never overlaps a commit's apply.
    pub fn read<R>(
        &self,
        f: impl FnOnce(&DatabaseState) -> R,
    ) -> R {
        f(&self.state.read())
    }

    /// Sessions in the committed state. Taken under the commit lock, so a
    /// session commit in flight is either included or not yet validated.
    pub fn logged_session_ids(&self) -> Vec<SessionId> {
        let _commit = self.commit_lock.lock();
        self.state.read().sessions.keys().copied().collect()
    }

    /// Writes a snapshot of the current state
    pub fn take_snapshot(&self) -> Result<Zxid> {
        let _commit = self.commit_lock.lock();
        self.take_snapshot_locked()
    }

    fn take_snapshot_locked(&self) -> Result<Zxid> {
        let last_zxid = self.last_zxid();
        let blob = {
            let state = self.state.read();
            let image = SnapshotImage {
                last_zxid,
                tree: state.tree.clone(),
                sessions: state.sessions.clone(),
            };
            encode_snapshot(&image)?
        };
        self.store.save_snapshot(last_zxid, &blob)?;
        self.txns_since_snapshot.store(0, Ordering::SeqCst);
        Ok(last_zxid)
    }

    pub fn last_zxid(&self) -> Zxid {
        self.last_zxid.load(Ordering::SeqCst)
    }

    pub fn node_count(&self) -> usize {
        self.state.read().tree.node_count()
    }

    pub fn ephemeral_count(&self) -> usize {
        self.state.read().tree.ephemeral_count()
    }

    pub fn approximate_data_size(&self) -> usize {
        self.state.read().tree.approximate_data_size()
    }

    pub fn watches(&self) -> &Arc<WatchManager> {
        &self.watches
    }

    pub fn flush(&self) -> Result<()> {
        let _commit = self.commit_lock.lock();
        self.store.flush()
    }

    pub fn close(&self) -> Result<()> {
        let _commit = self.commit_lock.lock();
        self.store.flush()?;
        self.store.close()
    }
}

/// Applies a logged transaction. Deterministic: replaying the same entries
/// on the same starting state always yields the same state.
pub fn apply_txn(
    state: &mut DatabaseState,
    entry: &TxnEntry,
) -> std::result::Result<(Applied, Vec<WatchTrigger>), KeeperError> {
    let zxid = entry.zxid;
    match &entry.txn {
        Txn::CreateSession { timeout_ms } => {
            state.sessions.insert(entry.session_id, *timeout_ms);
            Ok((Applied::SessionCreated, Vec::new()))
        }
        Txn::CloseSession => {
            state.sessions.remove(&entry.session_id);
            let removed = state.tree.ephemerals(entry.session_id);
            let triggers = state.tree.kill_session(entry.session_id, zxid);
            Ok((Applied::SessionClosed { removed }, triggers))
        }
        Txn::Create {
            path,
            data,
            ephemeral_owner,
        } => {
            let (stat, triggers) =
                state.tree.create_node(path, data.clone(), *ephemeral_owner, zxid, entry.time)?;
            Ok((
                Applied::Created {
                    path: path.clone(),
                    stat,
                },
                triggers,
            ))
        }
        Txn::Delete { path } => {
            let triggers = state.tree.delete_node(path, -1, zxid)?;
            Ok((Applied::Deleted, triggers))
        }
        Txn::SetData {
            path,
            data,
            version,
        } => {
            let (stat, triggers) = state.tree.set_data(path, data.clone(), -1, zxid, entry.time)?;
            if stat.version != *version {
                warn!(%path, logged = version, applied = stat.version, "version drift on apply");
            }
            Ok((Applied::DataSet { stat }, triggers))
        }
    }
}

fn fatal(e: Error) -> Error {
    match e {
        Error::Fatal(_) => e,
        e if e.is_fatal() => Error::Fatal(e.to_string()),
        e => e,
    }
}
