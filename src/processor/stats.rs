use crate::Zxid;

/// Point-in-time counters of a running server
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub serving: bool,
    pub session_count: usize,
    pub alive_connections: usize,
    pub node_count: usize,
    pub watch_count: usize,
    pub watched_paths: usize,
    pub ephemeral_count: usize,
    pub approximate_data_size: usize,
    pub last_zxid: Zxid,
    pub packets_received: u64,
    pub packets_sent: u64,
    /// Requests currently inside the processor
    pub outstanding_requests: usize,
}
