// -
// Storage layout

/// Sub-directory holding log and snapshot files, per data directory
pub(crate) const VERSION_DIR: &str = "version-2";

/// Transaction log file prefix, followed by the first zxid in hex
pub(crate) const LOG_FILE_PREFIX: &str = "log.";

/// Snapshot file prefix, followed by the last included zxid in hex
pub(crate) const SNAPSHOT_FILE_PREFIX: &str = "snapshot.";

/// Sled tree namespaces
pub(crate) const SLED_TXN_LOG_TREE: &str = "_keeper_txn_log";
pub(crate) const SLED_SNAPSHOT_TREE: &str = "_keeper_snapshots";

// -
// Wire protocol

/// Frame header: 4-byte big-endian body length
pub(crate) const FRAME_HEADER_LEN: usize = 4;

/// Extra room on top of the payload bound for request envelopes
pub(crate) const FRAME_OVERHEAD_BYTES: usize = 4096;

/// Length of the per-session password
pub const SESSION_PASSWD_LEN: usize = 16;

/// Seed mixed into session password derivation
pub(crate) const SESSION_PASSWD_SECRET: u64 = 0x00B3_415C_3CB0_E3F1;

/// Width of the sequential node suffix
pub(crate) const SEQUENTIAL_SUFFIX_WIDTH: usize = 10;

/// Server version reported by status words
pub const KEEPER_VERSION: &str = env!("CARGO_PKG_VERSION");
