use d_keeper::CreateMode;
use d_keeper::KeeperError;
use d_keeper::StorageEngineKind;
use tempfile::TempDir;

use crate::common::connect;
use crate::common::server_config;
use crate::common::start_server;
use crate::common::TRANSPORTS;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_restart_replays_tree_and_sequence_counters() {
    for engine in [StorageEngineKind::File, StorageEngineKind::Sled] {
        let dir = TempDir::new().unwrap();
        let mut config = server_config(dir.path(), TRANSPORTS[0]);
        config.storage.engine = engine;

        let (server, addr) = start_server(config.clone()).await;
        let client = connect(addr).await;
        client.create("/app", "v1", CreateMode::Persistent).await.unwrap();
        client.set_data("/app", "v2", 0).await.unwrap();
        for expected in ["/app/job-0000000000", "/app/job-0000000001"] {
            let path = client
                .create("/app/job-", Vec::new(), CreateMode::PersistentSequential)
                .await
                .unwrap();
            assert_eq!(path, expected);
        }
        client.create("/app/lease", Vec::new(), CreateMode::Ephemeral).await.unwrap();
        client.close().await.unwrap();
        server.shutdown().await.unwrap();

        let (server, addr) = start_server(config).await;
        let client = connect(addr).await;
        let (data, stat) = client.get_data("/app", false).await.unwrap();
        assert_eq!(data, b"v2", "{engine:?}");
        assert_eq!(stat.version, 1);
        let err = client.get_data("/app/lease", false).await.unwrap_err();
        assert_eq!(err.keeper_error(), Some(KeeperError::NoNode));

        // cversion counted both jobs plus the ephemeral's create and delete
        let path = client
            .create("/app/job-", Vec::new(), CreateMode::PersistentSequential)
            .await
            .unwrap();
        assert_eq!(path, "/app/job-0000000004");

        client.close().await.unwrap();
        server.shutdown().await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_restart_across_snapshots_and_rolled_logs() {
    let dir = TempDir::new().unwrap();
    let mut config = server_config(dir.path(), TRANSPORTS[1]);
    config.storage.snap_count = 4;

    let (server, addr) = start_server(config.clone()).await;
    let client = connect(addr).await;
    for i in 0..25 {
        client
            .create(&format!("/n{i}"), format!("{i}"), CreateMode::Persistent)
            .await
            .unwrap();
    }
    client.delete("/n0", -1).await.unwrap();
    client.close().await.unwrap();
    server.shutdown().await.unwrap();

    let snapshots = std::fs::read_dir(dir.path().join("data/version-2"))
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with("snapshot."))
        .count();
    assert!(snapshots >= 1);

    let (server, addr) = start_server(config).await;
    let client = connect(addr).await;
    let mut children = client.get_children("/", false).await.unwrap();
    children.sort();
    assert_eq!(children.len(), 24);
    assert!(!children.contains(&"n0".to_string()));
    let (data, _) = client.get_data("/n24", false).await.unwrap();
    assert_eq!(data, b"24");

    client.close().await.unwrap();
    server.shutdown().await.unwrap();
}
