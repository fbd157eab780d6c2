//! A standalone hierarchical coordination service.
//!
//! Clients open sessions over TCP and operate on a tree of named nodes
//! (create, read, update, delete, list children), optionally leaving
//! one-shot watches that notify them of later changes. Ephemeral nodes live
//! only as long as the session that created them. Every committed change is
//! written to a transaction log and periodically captured in a snapshot, so
//! a restarted server recovers the same tree.
//!
//! ```no_run
//! use d_keeper::KeeperConfig;
//! use d_keeper::KeeperServer;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = KeeperConfig::new().unwrap().validate().unwrap();
//!     let server = KeeperServer::new(config);
//!     let addr = server.start().await.unwrap();
//!     println!("serving on {addr}");
//!     tokio::signal::ctrl_c().await.unwrap();
//!     server.shutdown().await.unwrap();
//! }
//! ```

mod client;
mod config;
pub(crate) mod constants;
mod database;
mod errors;
mod metrics;
mod network;
mod processor;
pub mod proto;
mod server;
mod session;
mod storage;
mod tree;
pub mod utils;
mod watch;

pub use client::*;
pub use config::*;
pub use database::*;
pub use errors::*;
pub use metrics::*;
pub use network::*;
pub use processor::*;
pub use proto::*;
pub use server::*;
pub use session::*;
pub use storage::*;
pub use tree::*;
pub use watch::*;
