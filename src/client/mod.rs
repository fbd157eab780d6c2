//! Asynchronous client for a keeper node.
//!
//! ```no_run
//! use d_keeper::ClientConfig;
//! use d_keeper::CreateMode;
//! use d_keeper::KeeperClient;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let addr = "127.0.0.1:2181".parse().unwrap();
//!     let client = KeeperClient::connect(addr, ClientConfig::default()).await.unwrap();
//!     client.create("/foo", "foobar", CreateMode::Persistent).await.unwrap();
//!     let (data, stat) = client.get_data("/foo", false).await.unwrap();
//!     println!("{:?} version {}", data, stat.version);
//!     client.close().await.unwrap();
//! }
//! ```

mod config;
mod error;
mod keeper_client;

pub use config::*;
pub use error::*;
pub use keeper_client::*;

#[cfg(test)]
mod client_test;
