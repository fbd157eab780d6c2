use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use super::invalid;
use crate::Result;

/// Which connection acceptor/framer serves clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// One reader and one writer thread per connection, blocking sockets
    #[default]
    Threaded,
    /// Tokio event loop, one task per connection
    EventLoop,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    /// Client port; port 0 asks the OS for a free one
    #[serde(default = "default_listen_addr")]
    pub listen_address: SocketAddr,

    /// Basic time unit; session deadlines are rounded to it
    #[serde(default = "default_tick_time")]
    pub tick_time_ms: u64,

    /// Lower bound for negotiated session timeouts (0 = 2 ticks)
    #[serde(default)]
    pub min_session_timeout_ms: u64,

    /// Upper bound for negotiated session timeouts (0 = 20 ticks)
    #[serde(default)]
    pub max_session_timeout_ms: u64,

    /// Maximum concurrent client connections (0 = unlimited)
    #[serde(default)]
    pub max_client_connections: usize,

    /// Connection transport implementation
    #[serde(default)]
    pub transport: TransportKind,

    /// Expiration sweep period (0 = one tick)
    #[serde(default)]
    pub session_sweep_interval_ms: u64,

    /// Directory for the node's own log file
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_addr(),
            tick_time_ms: default_tick_time(),
            min_session_timeout_ms: 0,
            max_session_timeout_ms: 0,
            max_client_connections: 0,
            transport: TransportKind::default(),
            session_sweep_interval_ms: 0,
            log_dir: default_log_dir(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tick_time_ms == 0 {
            return Err(invalid("tick_time_ms must be > 0".into()));
        }

        let (min, max) = self.session_timeout_bounds();
        if min > max {
            return Err(invalid(format!(
                "min_session_timeout_ms {min} must not exceed max_session_timeout_ms {max}"
            )));
        }

        Ok(())
    }

    /// Effective `[min, max]` session timeout in milliseconds
    pub fn session_timeout_bounds(&self) -> (u64, u64) {
        let min = if self.min_session_timeout_ms == 0 {
            self.tick_time_ms * 2
        } else {
            self.min_session_timeout_ms
        };
        let max = if self.max_session_timeout_ms == 0 {
            self.tick_time_ms * 20
        } else {
            self.max_session_timeout_ms
        };
        (min, max)
    }

    pub fn sweep_interval(&self) -> Duration {
        if self.session_sweep_interval_ms == 0 {
            Duration::from_millis(self.tick_time_ms)
        } else {
            Duration::from_millis(self.session_sweep_interval_ms)
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 2181))
}
fn default_tick_time() -> u64 {
    2000
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("/tmp/d-keeper/logs")
}
