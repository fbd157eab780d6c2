use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use tempfile::TempDir;
use tracing_test::traced_test;

use super::*;
use crate::utils::net::send_four_letter_word;
use crate::utils::net::wait_for_server_down;
use crate::Error;
use crate::KeeperConfig;
use crate::LifecycleError;
use crate::StorageEngineKind;
use crate::TransportKind;

fn config(
    dir: &Path,
    transport: TransportKind,
) -> KeeperConfig {
    let mut config = KeeperConfig::default();
    config.server.listen_address = SocketAddr::from(([127, 0, 0, 1], 0));
    config.server.transport = transport;
    config.server.tick_time_ms = 100;
    config.storage.data_dir = dir.join("data");
    config.storage.data_log_dir = dir.join("log");
    config.storage.engine = StorageEngineKind::File;
    config.storage.force_sync = false;
    config
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_start_then_shutdown_twice() {
    for transport in [TransportKind::Threaded, TransportKind::EventLoop] {
        let dir = TempDir::new().unwrap();
        let server = KeeperServer::new(config(dir.path(), transport));
        assert_eq!(server.state(), ServerState::Stopped);

        let addr = server.start().await.unwrap();
        assert_eq!(server.state(), ServerState::Serving);
        assert_eq!(server.local_addr(), Some(addr));
        assert!(dir.path().join("data/version-2").is_dir());
        assert!(dir.path().join("log/version-2").is_dir());
        assert_eq!(
            send_four_letter_word(addr, "ruok", Duration::from_secs(2)).await.unwrap(),
            "imok"
        );

        server.shutdown().await.unwrap();
        server.shutdown().await.unwrap();
        assert_eq!(server.state(), ServerState::Stopped);
        assert!(server.local_addr().is_none());
        assert!(server.stats().is_none());
        assert!(wait_for_server_down(addr, Duration::from_secs(5)).await);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_start_on_running_server_is_rejected() {
    let dir = TempDir::new().unwrap();
    let server = KeeperServer::new(config(dir.path(), TransportKind::EventLoop));
    server.start().await.unwrap();

    let err = server.start().await.unwrap_err();
    assert!(matches!(err, Error::Lifecycle(LifecycleError::AlreadyRunning)));
    assert!(server.is_serving());
    server.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_starts_admit_exactly_one() {
    let dir = TempDir::new().unwrap();
    let server = KeeperServer::new(config(dir.path(), TransportKind::Threaded));

    let (a, b) = tokio::join!(server.start(), server.start());
    assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
    let err = a.err().or(b.err()).unwrap();
    assert!(matches!(err, Error::Lifecycle(LifecycleError::AlreadyRunning)));
    server.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_server_can_restart_after_shutdown() {
    let dir = TempDir::new().unwrap();
    let server = KeeperServer::new(config(dir.path(), TransportKind::Threaded));
    server.start().await.unwrap();
    server.shutdown().await.unwrap();

    let addr = server.start().await.unwrap();
    assert!(server.stats().unwrap().serving);
    assert!(send_four_letter_word(addr, "stat", Duration::from_secs(2))
        .await
        .unwrap()
        .starts_with("Keeper version:"));
    server.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[traced_test]
async fn test_corrupt_log_refuses_to_serve() {
    let dir = TempDir::new().unwrap();
    let log_dir = dir.path().join("log/version-2");
    fs::create_dir_all(&log_dir).unwrap();
    // length 4, wrong checksum, 4 body bytes
    fs::write(log_dir.join("log.1"), [0, 0, 0, 4, 0, 0, 0, 0, 1, 2, 3, 4]).unwrap();

    let server = KeeperServer::new(config(dir.path(), TransportKind::Threaded));
    let err = server.start().await.unwrap_err();
    assert!(err.is_fatal(), "{err:?}");
    assert_eq!(server.state(), ServerState::Stopped);
    assert!(server.local_addr().is_none());
    assert!(logs_contain("server failed to start"));

    // Nothing to shut down
    server.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bind_failure_leaves_server_stopped() {
    let dir = TempDir::new().unwrap();
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let mut config = config(dir.path(), TransportKind::EventLoop);
    config.server.listen_address = occupied.local_addr().unwrap();

    let server = KeeperServer::new(config);
    assert!(server.start().await.is_err());
    assert_eq!(server.state(), ServerState::Stopped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_memory_engine_needs_no_directories() {
    let mut config = KeeperConfig::default();
    config.server.listen_address = SocketAddr::from(([127, 0, 0, 1], 0));
    config.storage.engine = StorageEngineKind::Memory;
    config.storage.data_dir = "/nonexistent/keeper".into();

    let server = KeeperServer::new(config);
    server.start().await.unwrap();
    let stats = server.stats().unwrap();
    assert_eq!(stats.node_count, 1);
    assert_eq!(stats.session_count, 0);
    server.shutdown().await.unwrap();
}
