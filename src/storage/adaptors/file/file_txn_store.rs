//! Log segments and snapshot files on the local filesystem.
//!
//! Layout:
//! ```text
//! <log_dir>/version-2/log.<first zxid hex>
//! <data_dir>/version-2/snapshot.<last zxid hex>
//! ```
//! A new log segment starts with the first append after a snapshot or a
//! restart, so a segment's name is the zxid of its first entry.

use std::fs;
use std::fs::File;
use std::fs::OpenOptions;
use std::io::BufWriter;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use parking_lot::Mutex;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::constants::LOG_FILE_PREFIX;
use crate::constants::SNAPSHOT_FILE_PREFIX;
use crate::constants::VERSION_DIR;
use crate::storage::read_txn_frames;
use crate::utils::file_io::create_dir_if_not_exist;
use crate::utils::file_io::open_file_for_append;
use crate::utils::file_io::write_atomically;
use crate::encode_txn_frame;
use crate::Result;
use crate::StorageError;
use crate::TxnEntry;
use crate::TxnStore;
use crate::Zxid;

struct LogSegment {
    path: PathBuf,
    writer: BufWriter<File>,
}

#[derive(Debug, Default)]
struct Cursor {
    /// zxid of the last appended entry
    last_zxid: Zxid,
}

pub struct FileTxnStore {
    log_dir: PathBuf,
    snap_dir: PathBuf,
    force_sync: bool,
    retain_count: usize,
    segment: Mutex<Option<LogSegment>>,
    cursor: Mutex<Cursor>,
}

impl std::fmt::Debug for FileTxnStore {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("FileTxnStore")
            .field("log_dir", &self.log_dir)
            .field("snap_dir", &self.snap_dir)
            .field("force_sync", &self.force_sync)
            .finish()
    }
}

impl FileTxnStore {
    /// Opens the store, creating both version directories when absent
    pub fn open(
        data_dir: &Path,
        log_dir: &Path,
        force_sync: bool,
        retain_count: usize,
    ) -> Result<Self> {
        let snap_dir = data_dir.join(VERSION_DIR);
        let log_dir = log_dir.join(VERSION_DIR);
        create_dir_if_not_exist(&snap_dir)?;
        create_dir_if_not_exist(&log_dir)?;
        debug!(?log_dir, ?snap_dir, "file transaction store opened");

        Ok(Self {
            log_dir,
            snap_dir,
            force_sync,
            retain_count: retain_count.max(1),
            segment: Mutex::new(None),
            cursor: Mutex::new(Cursor::default()),
        })
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn snap_dir(&self) -> &Path {
        &self.snap_dir
    }

    /// Log segments sorted by their first zxid
    pub fn log_files(&self) -> Result<Vec<(Zxid, PathBuf)>> {
        list_by_zxid(&self.log_dir, LOG_FILE_PREFIX)
    }

    /// Snapshot files sorted by their last zxid
    pub fn snapshot_files(&self) -> Result<Vec<(Zxid, PathBuf)>> {
        list_by_zxid(&self.snap_dir, SNAPSHOT_FILE_PREFIX)
    }

    /// Ends the current segment; the next append opens a new one.
    fn roll_log(&self) -> Result<()> {
        if let Some(mut segment) = self.segment.lock().take() {
            sync_segment(&mut segment)?;
            debug!(path = ?segment.path, "log segment rolled");
        }
        Ok(())
    }

    /// Keeps the newest `retain_count` snapshots and the log segments still
    /// needed to replay on top of the oldest kept one.
    fn purge(&self) -> Result<()> {
        let snapshots = self.snapshot_files()?;
        if snapshots.len() <= self.retain_count {
            return Ok(());
        }
        let cut = snapshots.len() - self.retain_count;
        let oldest_kept = snapshots[cut].0;
        for (zxid, path) in &snapshots[..cut] {
            debug!(zxid, ?path, "purging snapshot");
            fs::remove_file(path).map_err(|e| StorageError::PathError {
                path: path.clone(),
                source: e,
            })?;
        }

        // A segment is obsolete when the next one starts at or below the
        // first zxid not covered by the oldest kept snapshot.
        let logs = self.log_files()?;
        for window in logs.windows(2) {
            let (_, path) = &window[0];
            let (next_start, _) = window[1];
            if next_start <= oldest_kept + 1 {
                debug!(?path, "purging log segment");
                fs::remove_file(path).map_err(|e| StorageError::PathError {
                    path: path.clone(),
                    source: e,
                })?;
            }
        }
        Ok(())
    }
}

impl TxnStore for FileTxnStore {
    fn append(
        &self,
        entry: &TxnEntry,
    ) -> Result<()> {
        let frame = encode_txn_frame(entry)?;
        let mut guard = self.segment.lock();
        if guard.is_none() {
            let path = self.log_dir.join(format!("{LOG_FILE_PREFIX}{:x}", entry.zxid));
            let file = open_file_for_append(path.clone())?;
            debug!(?path, "log segment started");
            *guard = Some(LogSegment {
                path,
                writer: BufWriter::new(file),
            });
        }
        let Some(segment) = guard.as_mut() else {
            return Err(StorageError::LogStorage("log segment unavailable".into()).into());
        };
        segment.writer.write_all(&frame).map_err(|e| StorageError::PathError {
            path: segment.path.clone(),
            source: e,
        })?;
        if self.force_sync {
            sync_segment(segment)?;
        }
        self.cursor.lock().last_zxid = entry.zxid;
        Ok(())
    }

    fn replay(
        &self,
        after: Zxid,
    ) -> Result<Vec<TxnEntry>> {
        let logs = self.log_files()?;
        let mut entries: Vec<TxnEntry> = Vec::new();
        for (idx, (start, path)) in logs.iter().enumerate() {
            // Every entry of this segment is below the next segment's start
            if let Some((next_start, _)) = logs.get(idx + 1) {
                if *next_start <= after + 1 {
                    continue;
                }
            }
            let location = path.display().to_string();
            let file = File::open(path).map_err(|e| StorageError::PathError {
                path: path.clone(),
                source: e,
            })?;
            let scan = read_txn_frames(file, &location)?;

            if scan.torn_bytes > 0 {
                if idx + 1 != logs.len() {
                    return Err(StorageError::DataCorruption {
                        location: format!("{location}: incomplete frame inside the log"),
                    }
                    .into());
                }
                warn!(
                    path = ?path,
                    torn_bytes = scan.torn_bytes,
                    "truncating incomplete frame at the end of the transaction log"
                );
                let file = OpenOptions::new().write(true).open(path).map_err(|e| {
                    StorageError::PathError {
                        path: path.clone(),
                        source: e,
                    }
                })?;
                file.set_len(scan.valid_len as u64).map_err(StorageError::IoError)?;
                file.sync_all().map_err(StorageError::IoError)?;
            }

            if let Some(first) = scan.entries.first() {
                if first.zxid < *start {
                    return Err(StorageError::DataCorruption {
                        location: format!("{location}: entry {} precedes segment start", first.zxid),
                    }
                    .into());
                }
            }
            for entry in scan.entries {
                if let Some(previous) = entries.last() {
                    if entry.zxid <= previous.zxid {
                        return Err(StorageError::DataCorruption {
                            location: format!(
                                "{location}: zxid {} not after {}",
                                entry.zxid, previous.zxid
                            ),
                        }
                        .into());
                    }
                }
                if entry.zxid > after {
                    entries.push(entry);
                }
            }
        }

        if let Some(last) = entries.last() {
            let mut cursor = self.cursor.lock();
            cursor.last_zxid = cursor.last_zxid.max(last.zxid);
        }
        info!(after, replayed = entries.len(), "transaction log scanned");
        Ok(entries)
    }

    fn save_snapshot(
        &self,
        last_zxid: Zxid,
        blob: &[u8],
    ) -> Result<()> {
        self.roll_log()?;
        let path = self.snap_dir.join(format!("{SNAPSHOT_FILE_PREFIX}{last_zxid:x}"));
        write_atomically(&path, blob, true)?;
        info!(?path, last_zxid, bytes = blob.len(), "snapshot written");
        self.purge()
    }

    fn latest_snapshot(&self) -> Result<Option<(Zxid, Vec<u8>)>> {
        let Some((zxid, path)) = self.snapshot_files()?.pop() else {
            return Ok(None);
        };
        let blob = fs::read(&path).map_err(|e| StorageError::PathError { path, source: e })?;
        Ok(Some((zxid, blob)))
    }

    fn flush(&self) -> Result<()> {
        if let Some(segment) = self.segment.lock().as_mut() {
            sync_segment(segment)?;
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.roll_log()?;
        debug!(last_zxid = self.cursor.lock().last_zxid, "file transaction store closed");
        Ok(())
    }
}

fn sync_segment(segment: &mut LogSegment) -> Result<()> {
    let path = segment.path.clone();
    let io = |e| StorageError::PathError {
        path: path.clone(),
        source: e,
    };
    segment.writer.flush().map_err(io)?;
    segment.writer.get_ref().sync_data().map_err(io)?;
    Ok(())
}

/// Files named `<prefix><zxid hex>` in `dir`, sorted by zxid
fn list_by_zxid(
    dir: &Path,
    prefix: &str,
) -> Result<Vec<(Zxid, PathBuf)>> {
    let read_dir = fs::read_dir(dir).map_err(|e| StorageError::PathError {
        path: dir.to_path_buf(),
        source: e,
    })?;
    let mut files = Vec::new();
    for item in read_dir {
        let item = item.map_err(StorageError::IoError)?;
        let name = item.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let Some(hex) = name.strip_prefix(prefix) else {
            continue;
        };
        match Zxid::from_str_radix(hex, 16) {
            Ok(zxid) => files.push((zxid, item.path())),
            Err(_) => debug!(file = %name, "ignoring unrelated file"),
        }
    }
    files.sort_by_key(|(zxid, _)| *zxid);
    Ok(files)
}
