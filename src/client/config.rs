use std::time::Duration;

use crate::proto::max_frame_len;

/// Client connection parameters
///
/// # Key Configuration Areas
/// - Connection establishment (TCP connect plus session handshake)
/// - Request/response lifecycle control
/// - Session timeout requested from the server
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Maximum time for the TCP connect and the session handshake
    /// Default: 2 seconds
    pub connect_timeout: Duration,

    /// Maximum time to wait for a reply
    /// Default: 5 seconds
    pub request_timeout: Duration,

    /// Session timeout asked for; the server clamps it into its bounds
    /// Default: 10 seconds
    pub session_timeout: Duration,

    /// Largest frame accepted from the server
    /// Default: room for a 1MB payload
    pub max_frame_len: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(2000),
            request_timeout: Duration::from_millis(5000),
            session_timeout: Duration::from_secs(10),
            max_frame_len: max_frame_len(1024 * 1024),
        }
    }
}
