use crate::KeeperError;

pub type ClientResult<T> = std::result::Result<T, ClientError>;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The server rejected the operation
    #[error(transparent)]
    Keeper(KeeperError),

    /// The connection is gone or a reply did not arrive in time. The session
    /// may still be alive and can be resumed.
    #[error("Connection loss")]
    ConnectionLoss,

    /// The server no longer knows the session
    #[error("Session expired")]
    SessionExpired,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The server sent something this client does not understand
    #[error("Protocol violation: {0}")]
    Protocol(String),
}

impl From<KeeperError> for ClientError {
    fn from(e: KeeperError) -> Self {
        match e {
            KeeperError::SessionExpired => ClientError::SessionExpired,
            KeeperError::ConnectionLoss => ClientError::ConnectionLoss,
            e => ClientError::Keeper(e),
        }
    }
}

impl ClientError {
    /// Server side failure code, when there is one
    pub fn keeper_error(&self) -> Option<KeeperError> {
        match self {
            ClientError::Keeper(e) => Some(*e),
            ClientError::SessionExpired => Some(KeeperError::SessionExpired),
            ClientError::ConnectionLoss => Some(KeeperError::ConnectionLoss),
            _ => None,
        }
    }

    /// Error handed to requests still waiting when the connection ended
    pub(super) fn for_pending(&self) -> ClientError {
        match self {
            ClientError::SessionExpired => ClientError::SessionExpired,
            _ => ClientError::ConnectionLoss,
        }
    }
}
