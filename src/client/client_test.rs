use std::net::SocketAddr;
use std::time::Duration;

use super::*;
use crate::CreateMode;
use crate::EventType;
use crate::KeeperConfig;
use crate::KeeperError;
use crate::KeeperServer;
use crate::StorageEngineKind;
use crate::TransportKind;

async fn start_server(transport: TransportKind) -> (KeeperServer, SocketAddr) {
    let mut config = KeeperConfig::default();
    config.server.listen_address = SocketAddr::from(([127, 0, 0, 1], 0));
    config.server.transport = transport;
    config.server.tick_time_ms = 100;
    config.storage.engine = StorageEngineKind::Memory;
    let server = KeeperServer::new(config);
    let addr = server.start().await.unwrap();
    (server, addr)
}

fn client_config() -> ClientConfig {
    ClientConfig {
        session_timeout: Duration::from_millis(1000),
        ..ClientConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_create_then_read_back() {
    for transport in [TransportKind::Threaded, TransportKind::EventLoop] {
        let (server, addr) = start_server(transport).await;
        let client = KeeperClient::connect(addr, client_config()).await.unwrap();
        assert!(client.session_id() != 0);
        assert_eq!(client.session_timeout_ms(), 1000);

        let path = client.create("/foo", "foobar", CreateMode::Persistent).await.unwrap();
        assert_eq!(path, "/foo");
        let (data, stat) = client.get_data("/foo", false).await.unwrap();
        assert_eq!(data, b"foobar");
        assert_eq!(stat.version, 0);
        assert_eq!(client.get_children("/", false).await.unwrap(), vec!["foo".to_string()]);

        client.close().await.unwrap();
        assert!(!client.is_connected());
        server.shutdown().await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_server_errors_surface_as_keeper_errors() {
    let (server, addr) = start_server(TransportKind::EventLoop).await;
    let client = KeeperClient::connect(addr, client_config()).await.unwrap();
    client.create("/a", Vec::new(), CreateMode::Persistent).await.unwrap();

    let err = client.create("/a", Vec::new(), CreateMode::Persistent).await.unwrap_err();
    assert_eq!(err.keeper_error(), Some(KeeperError::NodeExists));
    let err = client.set_data("/a", "x", 7).await.unwrap_err();
    assert!(matches!(err, ClientError::Keeper(KeeperError::BadVersion)));
    let err = client.delete("/missing", -1).await.unwrap_err();
    assert!(matches!(err, ClientError::Keeper(KeeperError::NoNode)));
    assert_eq!(client.exists("/missing", false).await.unwrap(), None);

    // The session survives failed requests
    client.ping().await.unwrap();
    client.close().await.unwrap();
    server.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_watch_fires_once_per_registration() {
    let (server, addr) = start_server(TransportKind::Threaded).await;
    let watcher = KeeperClient::connect(addr, client_config()).await.unwrap();
    let writer = KeeperClient::connect(addr, client_config()).await.unwrap();

    assert!(watcher.exists("/w", true).await.unwrap().is_none());
    writer.create("/w", "1", CreateMode::Persistent).await.unwrap();

    let event = watcher.next_event(Duration::from_secs(2)).await.unwrap();
    assert_eq!(event.event_type, EventType::NodeCreated);
    assert_eq!(event.path.as_deref(), Some("/w"));

    writer.set_data("/w", "2", -1).await.unwrap();
    assert!(watcher.next_event(Duration::from_millis(200)).await.is_none());

    watcher.close().await.unwrap();
    writer.close().await.unwrap();
    server.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_close_removes_ephemerals() {
    let (server, addr) = start_server(TransportKind::EventLoop).await;
    let owner = KeeperClient::connect(addr, client_config()).await.unwrap();
    let observer = KeeperClient::connect(addr, client_config()).await.unwrap();

    let path = owner
        .create("/lock-", Vec::new(), CreateMode::EphemeralSequential)
        .await
        .unwrap();
    assert_eq!(path, "/lock-0000000000");
    let stat = observer.exists(&path, true).await.unwrap().unwrap();
    assert_eq!(stat.ephemeral_owner, owner.session_id());

    owner.close().await.unwrap();
    let event = observer.next_event(Duration::from_secs(2)).await.unwrap();
    assert_eq!(event.event_type, EventType::NodeDeleted);
    assert!(observer.exists(&path, false).await.unwrap().is_none());

    observer.close().await.unwrap();
    server.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_resume_requires_the_session_password() {
    let (server, addr) = start_server(TransportKind::Threaded).await;
    let first = KeeperClient::connect(addr, client_config()).await.unwrap();
    let session_id = first.session_id();

    let err = KeeperClient::connect_with_session(addr, client_config(), session_id, b"wrong".to_vec())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::SessionExpired));

    let resumed = KeeperClient::connect_with_session(
        addr,
        client_config(),
        session_id,
        first.session_password().to_vec(),
    )
    .await
    .unwrap();
    assert_eq!(resumed.session_id(), session_id);
    resumed.ping().await.unwrap();

    resumed.close().await.unwrap();
    let err = KeeperClient::connect_with_session(
        addr,
        client_config(),
        session_id,
        first.session_password().to_vec(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ClientError::SessionExpired));
    server.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pings_keep_an_idle_session_alive() {
    let (server, addr) = start_server(TransportKind::EventLoop).await;
    let client = KeeperClient::connect(addr, client_config()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(client.is_connected());
    client.create("/alive", Vec::new(), CreateMode::Ephemeral).await.unwrap();

    client.close().await.unwrap();
    server.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_drops_connected_clients() {
    let (server, addr) = start_server(TransportKind::Threaded).await;
    let client = KeeperClient::connect(addr, client_config()).await.unwrap();

    server.shutdown().await.unwrap();
    let err = client.ping().await.unwrap_err();
    assert!(matches!(err, ClientError::ConnectionLoss | ClientError::Io(_)), "{err:?}");
    for _ in 0..50 {
        if !client.is_connected() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_connect_to_closed_port_fails() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = KeeperClient::connect(addr, client_config()).await.unwrap_err();
    assert!(matches!(err, ClientError::Io(_) | ClientError::ConnectionLoss));
}
