use serde::Deserialize;
use serde::Serialize;

use crate::KeeperError;
use crate::Stat;
use crate::WatchedEvent;

/// Globally unique client session identifier, 0 means "no session"
pub type SessionId = u64;

/// Transaction id: strictly increasing sequence number of committed changes
pub type Zxid = u64;

/// Version guard meaning "any version"
pub const ANY_VERSION: i32 = -1;

/// How a node is created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreateMode {
    Persistent,
    PersistentSequential,
    /// Removed together with the owning session
    Ephemeral,
    EphemeralSequential,
}

impl CreateMode {
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, CreateMode::Ephemeral | CreateMode::EphemeralSequential)
    }

    pub fn is_sequential(&self) -> bool {
        matches!(self, CreateMode::PersistentSequential | CreateMode::EphemeralSequential)
    }
}

/// Session handshake, always the first frame of a client connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectRequest {
    /// 0 to open a new session, otherwise the session to resume
    pub session_id: SessionId,
    /// Requested timeout; the server clamps it into its configured bounds
    pub timeout_ms: u64,
    /// Password handed out when the session was opened
    pub passwd: Vec<u8>,
    /// Highest zxid the client has observed
    pub last_zxid_seen: Zxid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectResponse {
    pub session_id: SessionId,
    /// Negotiated timeout; 0 means the session is expired or unknown
    pub timeout_ms: u64,
    pub passwd: Vec<u8>,
}

impl ConnectResponse {
    pub fn expired() -> Self {
        Self {
            session_id: 0,
            timeout_ms: 0,
            passwd: Vec::new(),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.timeout_ms == 0
    }
}

/// Client operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    Create {
        path: String,
        data: Vec<u8>,
        mode: CreateMode,
    },
    Delete {
        path: String,
        version: i32,
    },
    Exists {
        path: String,
        watch: bool,
    },
    GetData {
        path: String,
        watch: bool,
    },
    SetData {
        path: String,
        data: Vec<u8>,
        version: i32,
    },
    GetChildren {
        path: String,
        watch: bool,
    },
    Ping,
    CloseSession,
}

impl Request {
    /// Short operation name, used as metrics label and in logs
    pub fn op_name(&self) -> &'static str {
        match self {
            Request::Create { .. } => "create",
            Request::Delete { .. } => "delete",
            Request::Exists { .. } => "exists",
            Request::GetData { .. } => "get_data",
            Request::SetData { .. } => "set_data",
            Request::GetChildren { .. } => "get_children",
            Request::Ping => "ping",
            Request::CloseSession => "close_session",
        }
    }

    /// True for operations that go through the transaction log
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Request::Create { .. }
                | Request::Delete { .. }
                | Request::SetData { .. }
                | Request::CloseSession
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFrame {
    /// Client chosen correlation id, echoed in the reply
    pub xid: i32,
    pub request: Request,
}

/// Successful operation results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Create {
        /// Final path; differs from the requested one for sequential nodes
        path: String,
        stat: Stat,
    },
    Delete,
    Exists {
        /// None when the node does not exist
        stat: Option<Stat>,
    },
    GetData {
        data: Vec<u8>,
        stat: Stat,
    },
    SetData {
        stat: Stat,
    },
    GetChildren {
        children: Vec<String>,
        stat: Stat,
    },
    Ping,
    CloseSession,
}

pub type OpResult = std::result::Result<Response, KeeperError>;

/// Frames sent from server to client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerMessage {
    Reply {
        xid: i32,
        /// Last committed zxid when the reply was produced
        zxid: Zxid,
        result: OpResult,
    },
    Event(WatchedEvent),
}
