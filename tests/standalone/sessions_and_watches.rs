use std::time::Duration;

use d_keeper::ClientError;
use d_keeper::CreateMode;
use d_keeper::EventType;
use d_keeper::KeeperError;
use tempfile::TempDir;

use crate::common::connect;
use crate::common::server_config;
use crate::common::start_server;
use crate::common::TRANSPORTS;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_closing_a_session_removes_its_ephemerals() {
    for transport in TRANSPORTS {
        let dir = TempDir::new().unwrap();
        let (server, addr) = start_server(server_config(dir.path(), transport)).await;

        let owner = connect(addr).await;
        let reader = connect(addr).await;
        owner.create("/eph", "x", CreateMode::Ephemeral).await.unwrap();
        assert!(reader.exists("/eph", false).await.unwrap().is_some());

        owner.close().await.unwrap();
        let err = reader.get_data("/eph", false).await.unwrap_err();
        assert!(matches!(err, ClientError::Keeper(KeeperError::NoNode)), "{transport:?}: {err:?}");

        reader.close().await.unwrap();
        server.shutdown().await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_watch_fires_exactly_once_per_registration() {
    for transport in TRANSPORTS {
        let dir = TempDir::new().unwrap();
        let (server, addr) = start_server(server_config(dir.path(), transport)).await;

        let watcher = connect(addr).await;
        let writer = connect(addr).await;
        writer.create("/w", "0", CreateMode::Persistent).await.unwrap();

        watcher.get_data("/w", true).await.unwrap();
        watcher.exists("/w", true).await.unwrap();
        writer.set_data("/w", "1", -1).await.unwrap();

        for _ in 0..2 {
            let event = watcher.next_event(Duration::from_secs(2)).await.unwrap();
            assert_eq!(event.event_type, EventType::NodeDataChanged);
            assert_eq!(event.path.as_deref(), Some("/w"));
        }

        // The registrations are spent
        writer.set_data("/w", "2", -1).await.unwrap();
        assert!(watcher.next_event(Duration::from_millis(300)).await.is_none());

        // The watcher reads at least the version that fired
        watcher.get_data("/w", true).await.unwrap();
        writer.set_data("/w", "3", -1).await.unwrap();
        watcher.next_event(Duration::from_secs(2)).await.unwrap();
        let (data, stat) = watcher.get_data("/w", false).await.unwrap();
        assert_eq!(data, b"3");
        assert_eq!(stat.version, 3);

        watcher.close().await.unwrap();
        writer.close().await.unwrap();
        server.shutdown().await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_child_watch_and_ephemeral_owner_cleanup() {
    let dir = TempDir::new().unwrap();
    let (server, addr) = start_server(server_config(dir.path(), TRANSPORTS[1])).await;

    let observer = connect(addr).await;
    let member = connect(addr).await;
    observer.create("/group", Vec::new(), CreateMode::Persistent).await.unwrap();
    assert!(observer.get_children("/group", true).await.unwrap().is_empty());

    let path = member
        .create("/group/m-", Vec::new(), CreateMode::EphemeralSequential)
        .await
        .unwrap();
    let event = observer.next_event(Duration::from_secs(2)).await.unwrap();
    assert_eq!(event.event_type, EventType::NodeChildrenChanged);
    assert_eq!(event.path.as_deref(), Some("/group"));

    let err = member.create(&format!("{path}/child"), Vec::new(), CreateMode::Persistent).await.unwrap_err();
    assert_eq!(err.keeper_error(), Some(KeeperError::NoChildrenForEphemeral));

    observer.get_children("/group", true).await.unwrap();
    member.close().await.unwrap();
    let event = observer.next_event(Duration::from_secs(2)).await.unwrap();
    assert_eq!(event.event_type, EventType::NodeChildrenChanged);
    assert!(observer.get_children("/group", false).await.unwrap().is_empty());

    observer.close().await.unwrap();
    server.shutdown().await.unwrap();
}
