use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use d_keeper::ClientConfig;
use d_keeper::KeeperClient;
use d_keeper::KeeperConfig;
use d_keeper::KeeperServer;
use d_keeper::StorageEngineKind;
use d_keeper::TransportKind;

pub const WAIT_FOR_SERVER_IN_SEC: u64 = 5;

pub const TRANSPORTS: [TransportKind; 2] = [TransportKind::Threaded, TransportKind::EventLoop];

/// Server config rooted at `dir`, listening on a free loopback port.
/// The data directories are not created here; the server must do it.
pub fn server_config(
    dir: &Path,
    transport: TransportKind,
) -> KeeperConfig {
    let mut config = KeeperConfig::default();
    config.server.listen_address = SocketAddr::from(([127, 0, 0, 1], 0));
    config.server.transport = transport;
    config.server.tick_time_ms = 100;
    config.server.log_dir = dir.join("logs");
    config.storage.engine = StorageEngineKind::File;
    config.storage.data_dir = dir.join("data");
    config.storage.data_log_dir = dir.join("datalog");
    config.storage.force_sync = false;
    config.monitoring.prometheus_enabled = false;
    config
}

pub async fn start_server(config: KeeperConfig) -> (KeeperServer, SocketAddr) {
    let server = KeeperServer::new(config.validate().expect("valid config"));
    let addr = server.start().await.expect("server starts");
    assert!(
        d_keeper::utils::net::wait_for_server_up(addr, Duration::from_secs(WAIT_FOR_SERVER_IN_SEC)).await,
        "server at {addr} never answered stat"
    );
    (server, addr)
}

pub async fn connect(addr: SocketAddr) -> KeeperClient {
    let config = ClientConfig {
        session_timeout: Duration::from_millis(2000),
        ..ClientConfig::default()
    };
    KeeperClient::connect(addr, config).await.expect("client connects")
}
