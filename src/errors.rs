//! Coordination Service Error Hierarchy
//!
//! Defines the error types for a standalone coordination node, categorized by
//! layer: infrastructure failures (network, storage, serialization), client
//! visible operation failures, and lifecycle misuse.

use std::path::PathBuf;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;
use tokio::task::JoinError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Infrastructure-level failures (network, storage, serialization)
    #[error(transparent)]
    System(#[from] SystemError),

    /// Configuration loading or validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Client visible operation failures
    #[error(transparent)]
    Keeper(#[from] KeeperError),

    /// Server start/stop misuse
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

/// Operation failures reported to clients, one per failed request.
///
/// Every variant is a pure validation failure: the tree is left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, thiserror::Error)]
pub enum KeeperError {
    #[error("Node does not exist")]
    NoNode,

    #[error("Node already exists")]
    NodeExists,

    #[error("Node has children")]
    NotEmpty,

    #[error("Version does not match")]
    BadVersion,

    #[error("Ephemeral nodes may not have children")]
    NoChildrenForEphemeral,

    #[error("Session expired")]
    SessionExpired,

    /// Transport-level loss, recoverable by reconnecting with the same session
    #[error("Connection loss")]
    ConnectionLoss,

    /// Invalid path, oversized payload or malformed request
    #[error("Bad arguments")]
    BadArguments,

    #[error("Operation is unimplemented")]
    Unimplemented,
}

impl KeeperError {
    /// Stable numeric code used by status output and metrics labels
    pub fn code(&self) -> i32 {
        match self {
            KeeperError::ConnectionLoss => -4,
            KeeperError::Unimplemented => -6,
            KeeperError::BadArguments => -8,
            KeeperError::NoNode => -101,
            KeeperError::BadVersion => -103,
            KeeperError::NoChildrenForEphemeral => -108,
            KeeperError::NodeExists => -110,
            KeeperError::NotEmpty => -111,
            KeeperError::SessionExpired => -112,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            KeeperError::NoNode => "no_node",
            KeeperError::NodeExists => "node_exists",
            KeeperError::NotEmpty => "not_empty",
            KeeperError::BadVersion => "bad_version",
            KeeperError::NoChildrenForEphemeral => "no_children_for_ephemeral",
            KeeperError::SessionExpired => "session_expired",
            KeeperError::ConnectionLoss => "connection_loss",
            KeeperError::BadArguments => "bad_arguments",
            KeeperError::Unimplemented => "unimplemented",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("Server is already running")]
    AlreadyRunning,
}

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// Listener bind failures
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Frame exceeds the negotiated maximum
    #[error("Frame of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { len: usize, max: usize },

    /// Peer closed the connection or sent an undecodable frame
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// Socket level failures on a single connection
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    TaskFailed(#[from] JoinError),
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Disk I/O failures during log/snapshot operations
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// I/O failure with the offending path attached
    #[error("Error occurred at path: {path}")]
    PathError {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Log storage subsystem failures
    #[error("Log storage failure: {0}")]
    LogStorage(String),

    /// Checksum validation failures
    #[error("Data corruption detected at {location}")]
    DataCorruption { location: String },

    /// Embedded database errors
    #[error("Embedded database error: {0}")]
    DbError(#[from] sled::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    // Network layer
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    // Storage layer
    #[error("Storage operation failed: {0}")]
    Storage(#[from] StorageError),

    //Serialization
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),
}

// Serialization is classified separately (across protocol layers and system layers)
#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    #[error("Bincode serialization failed: {0}")]
    Bincode(#[from] bincode::Error),
}

impl From<NetworkError> for Error {
    fn from(e: NetworkError) -> Self {
        Error::System(SystemError::Network(e))
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Error::System(SystemError::Storage(e))
    }
}

impl From<SerializationError> for Error {
    fn from(e: SerializationError) -> Self {
        Error::System(SystemError::Serialization(e))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::System(SystemError::Storage(StorageError::IoError(e)))
    }
}

impl From<sled::Error> for Error {
    fn from(e: sled::Error) -> Self {
        Error::System(SystemError::Storage(StorageError::DbError(e)))
    }
}

impl Error {
    /// Returns the client visible failure carried by this error, if any
    pub fn keeper_error(&self) -> Option<KeeperError> {
        match self {
            Error::Keeper(e) => Some(*e),
            _ => None,
        }
    }

    /// True when the error must stop the node from serving
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Fatal(_)
                | Error::System(SystemError::Storage(StorageError::DataCorruption { .. }))
        )
    }
}
