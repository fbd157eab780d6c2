use std::time::Duration;

use tokio::net::TcpListener;

use super::file_io::create_dir_if_not_exist;
use super::file_io::write_atomically;
use super::net::send_four_letter_word;
use super::net::wait_for_server_down;
use super::time::round_up_to_interval;

#[test]
fn round_up_to_interval_moves_to_next_bucket() {
    assert_eq!(round_up_to_interval(0, 100), 100);
    assert_eq!(round_up_to_interval(99, 100), 100);
    assert_eq!(round_up_to_interval(100, 100), 200);
    assert_eq!(round_up_to_interval(42, 0), 42);
}

#[test]
fn create_dir_if_not_exist_creates_nested_dirs() {
    let temp_dir = tempfile::tempdir().unwrap();
    let nested = temp_dir.path().join("a/b/c");

    create_dir_if_not_exist(&nested).unwrap();
    assert!(nested.is_dir());

    // Second call is a no-op
    create_dir_if_not_exist(&nested).unwrap();
}

#[test]
fn write_atomically_replaces_content_without_leftover_tmp() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("dir/snapshot.1");

    write_atomically(&path, b"first", false).unwrap();
    write_atomically(&path, b"second", true).unwrap();

    assert_eq!(std::fs::read(&path).unwrap(), b"second");
    assert!(!path.with_extension("tmp").exists());
}

#[tokio::test]
async fn wait_for_server_down_returns_true_for_closed_port() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    assert!(wait_for_server_down(addr, Duration::from_secs(2)).await);
}

#[tokio::test]
async fn send_four_letter_word_fails_on_closed_port() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    assert!(send_four_letter_word(addr, "ruok", Duration::from_millis(500)).await.is_err());
}
