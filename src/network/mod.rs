//! Client-facing transports.
//!
//! A transport accepts sockets, answers four-letter status words, runs the
//! session handshake, turns frames into [`RequestFrame`]s for the
//! [`RequestHandler`] and writes replies and watch events back. Two
//! interchangeable implementations exist:
//! - [`ThreadedTransport`]: blocking sockets, one reader and one writer thread
//!   per connection
//! - [`EventLoopTransport`]: tokio tasks multiplexed on the runtime
//!
//! Neither needs cross-connection locking; the handler is the only shared
//! synchronisation point.
//!
//! [`RequestFrame`]: crate::RequestFrame

mod connection_table;
mod event_loop;
mod threaded;
pub(crate) use connection_table::*;
pub use event_loop::*;
pub use threaded::*;


use std::net::SocketAddr;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::KeeperError;
use crate::KeeperState;
use crate::RequestHandler;
use crate::Response;
use crate::Result;
use crate::ServerMessage;
use crate::SessionId;
use crate::TransportKind;

pub trait Transport: Send + Sync + 'static {
    fn kind(&self) -> TransportKind;

    /// Binds `listen_address` and starts serving clients through `handler`.
    /// Returns the bound address, which differs from the requested one when
    /// port 0 was asked for.
    fn start(
        &self,
        handler: Arc<dyn RequestHandler>,
        listen_address: SocketAddr,
    ) -> Result<SocketAddr>;

    /// Stops accepting, closes every connection and releases the port.
    /// Calling it on a stopped transport does nothing.
    fn shutdown(&self) -> BoxFuture<'_, ()>;

    /// Queues `message` on the connection currently serving `session_id`
    fn send(
        &self,
        session_id: SessionId,
        message: ServerMessage,
    ) -> bool;

    fn local_addr(&self) -> Option<SocketAddr>;

    /// Connections that completed the session handshake
    fn connection_count(&self) -> usize;
}

/// Builds the transport selected in the configuration
pub fn create_transport(kind: TransportKind) -> Arc<dyn Transport> {
    match kind {
        TransportKind::Threaded => Arc::new(ThreadedTransport::new()),
        TransportKind::EventLoop => Arc::new(EventLoopTransport::new()),
    }
}

/// True for the last message a connection writes before closing
pub(crate) fn ends_connection(message: &ServerMessage) -> bool {
    match message {
        ServerMessage::Event(event) => event.state == KeeperState::Expired,
        ServerMessage::Reply { result, .. } => matches!(
            result,
            Ok(Response::CloseSession) | Err(KeeperError::SessionExpired)
        ),
    }
}
