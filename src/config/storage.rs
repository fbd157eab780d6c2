use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use super::invalid;
use super::validate_directory;
use crate::Result;

/// Backing engine for the transaction log and snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageEngineKind {
    /// Append-only log files plus compressed snapshot files
    #[default]
    File,
    /// Sled trees keyed by zxid
    Sled,
    /// Volatile, nothing survives a restart
    Memory,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageConfig {
    /// Snapshot directory
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Transaction log directory; empty means `data_dir`
    #[serde(default)]
    pub data_log_dir: PathBuf,

    #[serde(default)]
    pub engine: StorageEngineKind,

    /// Transactions between two snapshots
    #[serde(default = "default_snap_count")]
    pub snap_count: u64,

    /// fsync every appended transaction
    #[serde(default = "default_force_sync")]
    pub force_sync: bool,

    /// Snapshots (and the logs they cover) kept on disk
    #[serde(default = "default_snapshot_retain_count")]
    pub snapshot_retain_count: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            data_log_dir: PathBuf::new(),
            engine: StorageEngineKind::default(),
            snap_count: default_snap_count(),
            force_sync: default_force_sync(),
            snapshot_retain_count: default_snapshot_retain_count(),
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Result<()> {
        if self.snap_count == 0 {
            return Err(invalid("snap_count must be > 0".into()));
        }
        if self.snapshot_retain_count == 0 {
            return Err(invalid("snapshot_retain_count must be >= 1".into()));
        }

        if self.engine != StorageEngineKind::Memory {
            validate_directory(&self.data_dir, "data_dir")?;
            validate_directory(&self.log_dir(), "data_log_dir")?;
        }

        Ok(())
    }

    /// Effective transaction log directory
    pub fn log_dir(&self) -> PathBuf {
        if self.data_log_dir.as_os_str().is_empty() {
            self.data_dir.clone()
        } else {
            self.data_log_dir.clone()
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/tmp/d-keeper/data")
}
fn default_snap_count() -> u64 {
    100_000
}
fn default_force_sync() -> bool {
    true
}
fn default_snapshot_retain_count() -> usize {
    3
}
