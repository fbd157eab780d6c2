use serde::Deserialize;
use serde::Serialize;

/// What happened to a watched path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// Session state change, carries no path
    None,
    NodeCreated,
    NodeDeleted,
    NodeDataChanged,
    NodeChildrenChanged,
}

/// Connection state reported alongside an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeeperState {
    SyncConnected,
    /// The session is gone; the server closes the connection after this event
    Expired,
}

/// Notification pushed to a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedEvent {
    pub event_type: EventType,
    pub state: KeeperState,
    pub path: Option<String>,
}

impl WatchedEvent {
    pub fn node(
        event_type: EventType,
        path: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            state: KeeperState::SyncConnected,
            path: Some(path.into()),
        }
    }

    pub fn expired() -> Self {
        Self {
            event_type: EventType::None,
            state: KeeperState::Expired,
            path: None,
        }
    }
}

/// A path touched by a tree mutation, together with the event it raises
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchTrigger {
    pub path: String,
    pub event_type: EventType,
}

impl WatchTrigger {
    pub fn new(
        path: &str,
        event_type: EventType,
    ) -> Self {
        Self {
            path: path.to_string(),
            event_type,
        }
    }
}

/// Which registry a watch lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchKind {
    /// Placed by `get_data` and `exists`
    Data,
    /// Placed by `get_children`
    Child,
}
