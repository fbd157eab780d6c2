use std::fs;
use std::time::Duration;

use d_keeper::utils::net::send_four_letter_word;
use d_keeper::utils::net::wait_for_server_down;
use d_keeper::CreateMode;
use d_keeper::KeeperConfig;
use d_keeper::ServerState;
use tempfile::TempDir;
use tracing_test::traced_test;

use crate::common::connect;
use crate::common::server_config;
use crate::common::start_server;
use crate::common::TRANSPORTS;
use crate::common::WAIT_FOR_SERVER_IN_SEC;

/// Fresh directories, one round trip, orderly stop; under both transports.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[traced_test]
async fn test_round_trip_then_clean_shutdown() {
    for transport in TRANSPORTS {
        let dir = TempDir::new().unwrap();
        let (server, addr) = start_server(server_config(dir.path(), transport)).await;
        assert!(dir.path().join("data/version-2").is_dir());
        assert!(dir.path().join("datalog/version-2").is_dir());

        let client = connect(addr).await;
        let path = client.create("/foo", "foobar", CreateMode::Persistent).await.unwrap();
        assert_eq!(path, "/foo");
        let (data, stat) = client.get_data("/foo", false).await.unwrap();
        assert_eq!(data, b"foobar");
        assert_eq!(stat.version, 0);
        client.close().await.unwrap();

        server.shutdown().await.unwrap();
        server.shutdown().await.unwrap();
        assert_eq!(server.state(), ServerState::Stopped);
        assert!(
            wait_for_server_down(addr, Duration::from_secs(WAIT_FOR_SERVER_IN_SEC)).await,
            "{transport:?} still accepts connections after shutdown"
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_status_words_report_standalone_mode() {
    let dir = TempDir::new().unwrap();
    let (server, addr) = start_server(server_config(dir.path(), TRANSPORTS[1])).await;
    let timeout = Duration::from_secs(2);

    assert_eq!(send_four_letter_word(addr, "ruok", timeout).await.unwrap(), "imok");
    let srvr = send_four_letter_word(addr, "srvr", timeout).await.unwrap();
    assert!(srvr.contains("Mode: standalone"), "{srvr}");
    let mntr = send_four_letter_word(addr, "mntr", timeout).await.unwrap();
    assert!(mntr.lines().any(|line| line.starts_with("keeper_znode_count\t")), "{mntr}");

    server.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial_test::serial]
async fn test_boot_from_config_file() {
    let dir = TempDir::new().unwrap();
    let data_dir = dir.path().join("data");
    let config_path = dir.path().join("keeper.toml");
    fs::write(
        &config_path,
        format!(
            r#"
[server]
listen_address = "127.0.0.1:0"
transport = "event_loop"
tick_time_ms = 100

[storage]
engine = "file"
data_dir = "{}"
data_log_dir = "{}"
"#,
            data_dir.display(),
            data_dir.display()
        ),
    )
    .unwrap();

    let config = KeeperConfig::new()
        .unwrap()
        .with_override_config(config_path.to_str().unwrap())
        .unwrap();
    assert_eq!(config.storage.data_dir, data_dir);
    let (server, addr) = start_server(config).await;

    let client = connect(addr).await;
    client.create("/from-file", Vec::new(), CreateMode::Persistent).await.unwrap();
    client.close().await.unwrap();
    server.shutdown().await.unwrap();
    assert!(data_dir.join("version-2").is_dir());
}
