//! Thread-per-connection transport on blocking sockets.
//!
//! The acceptor polls a non-blocking listener so it notices shutdown
//! promptly. Each accepted socket gets a reader thread, which owns the
//! handshake and feeds requests to the handler, and after the handshake a
//! writer thread draining the connection's outbound queue.

use std::io::BufReader;
use std::io::ErrorKind;
use std::io::Write;
use std::net::Shutdown;
use std::net::SocketAddr;
use std::net::TcpListener;
use std::net::TcpStream;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::ends_connection;
use super::ConnectionTable;
use super::Transport;
use crate::proto::decode_body;
use crate::proto::read_frame;
use crate::proto::read_frame_body;
use crate::proto::read_frame_header;
use crate::proto::write_frame;
use crate::ConnectRequest;
use crate::ConnectionId;
use crate::Error;
use crate::FourLetterWord;
use crate::LifecycleError;
use crate::NetworkError;
use crate::RequestFrame;
use crate::RequestHandler;
use crate::Result;
use crate::ServerMessage;
use crate::SessionId;
use crate::TransportKind;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(20);

struct Shared {
    running: AtomicBool,
    connections: ConnectionTable,
    /// Socket handles kept to unblock readers on shutdown
    streams: DashMap<ConnectionId, TcpStream>,
}

pub struct ThreadedTransport {
    shared: Arc<Shared>,
    acceptor: Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl std::fmt::Debug for ThreadedTransport {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ThreadedTransport")
            .field("local_addr", &*self.local_addr.lock())
            .field("connections", &self.shared.connections.len())
            .finish()
    }
}

impl Default for ThreadedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadedTransport {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                connections: ConnectionTable::new(),
                streams: DashMap::new(),
            }),
            acceptor: Mutex::new(None),
            local_addr: Mutex::new(None),
        }
    }
}

impl Transport for ThreadedTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Threaded
    }

    fn start(
        &self,
        handler: Arc<dyn RequestHandler>,
        listen_address: SocketAddr,
    ) -> Result<SocketAddr> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Err(LifecycleError::AlreadyRunning.into());
        }
        let (listener, local_addr) = match bind(listen_address) {
            Ok(bound) => bound,
            Err(e) => {
                self.shared.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        let shared = self.shared.clone();
        let acceptor = thread::Builder::new()
            .name("keeper-acceptor".into())
            .spawn(move || accept_loop(listener, handler, shared))
            .map_err(|e| {
                self.shared.running.store(false, Ordering::SeqCst);
                NetworkError::Io(e)
            })?;

        *self.acceptor.lock() = Some(acceptor);
        *self.local_addr.lock() = Some(local_addr);
        info!(%local_addr, "threaded transport listening");
        Ok(local_addr)
    }

    fn shutdown(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if !self.shared.running.swap(false, Ordering::SeqCst) {
                return;
            }
            for entry in self.shared.streams.iter() {
                let _ = entry.value().shutdown(Shutdown::Both);
            }

            let acceptor = self.acceptor.lock().take();
            if let Some(handle) = acceptor {
                match tokio::task::spawn_blocking(move || handle.join()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => error!("acceptor thread panicked"),
                    Err(e) => error!("failed to join acceptor thread: {}", e),
                }
            }
            self.shared.connections.clear();
            if let Some(local_addr) = self.local_addr.lock().take() {
                info!(%local_addr, "threaded transport stopped");
            }
        })
    }

    fn send(
        &self,
        session_id: SessionId,
        message: ServerMessage,
    ) -> bool {
        self.shared.connections.send(session_id, message)
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    fn connection_count(&self) -> usize {
        self.shared.connections.len()
    }
}

fn bind(listen_address: SocketAddr) -> Result<(TcpListener, SocketAddr)> {
    let bind_error = |e| NetworkError::Bind {
        address: listen_address.to_string(),
        source: e,
    };
    let listener = TcpListener::bind(listen_address).map_err(bind_error)?;
    listener.set_nonblocking(true).map_err(bind_error)?;
    let local_addr = listener.local_addr().map_err(bind_error)?;
    Ok((listener, local_addr))
}

fn accept_loop(
    listener: TcpListener,
    handler: Arc<dyn RequestHandler>,
    shared: Arc<Shared>,
) {
    while shared.running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                let connection_id = shared.connections.next_id();
                trace!(connection_id, %peer, "connection accepted");
                let handler = handler.clone();
                let shared = shared.clone();
                let spawned = thread::Builder::new()
                    .name(format!("keeper-conn-{connection_id}"))
                    .spawn(move || serve_connection(stream, connection_id, handler, shared));
                if let Err(e) = spawned {
                    error!(connection_id, "failed to spawn connection thread: {}", e);
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL_INTERVAL),
            Err(e) => {
                warn!("accept failed: {}", e);
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }
    debug!("acceptor stopped");
}

fn serve_connection(
    stream: TcpStream,
    connection_id: ConnectionId,
    handler: Arc<dyn RequestHandler>,
    shared: Arc<Shared>,
) {
    if !handler.connection_opened(connection_id) {
        let _ = stream.shutdown(Shutdown::Both);
        return;
    }
    if let Err(e) = stream.set_nonblocking(false) {
        warn!(connection_id, "socket can not be made blocking: {}", e);
    }
    if let Ok(handle) = stream.try_clone() {
        shared.streams.insert(connection_id, handle);
    }

    let mut session_id = None;
    if shared.running.load(Ordering::SeqCst) {
        if let Err(e) = run_connection(&stream, connection_id, handler.as_ref(), &shared, &mut session_id) {
            debug!(connection_id, "connection ended: {}", e);
        }
    }

    shared.streams.remove(&connection_id);
    shared.connections.remove(connection_id);
    let _ = stream.shutdown(Shutdown::Both);
    handler.connection_closed(connection_id, session_id);
    trace!(connection_id, "connection closed");
}

fn run_connection(
    stream: &TcpStream,
    connection_id: ConnectionId,
    handler: &dyn RequestHandler,
    shared: &Shared,
    session_slot: &mut Option<SessionId>,
) -> Result<()> {
    let mut reader = BufReader::new(stream.try_clone().map_err(NetworkError::Io)?);
    let mut writer = stream.try_clone().map_err(NetworkError::Io)?;
    let max_frame = handler.max_frame_len();

    let Some(header) = read_frame_header(&mut reader)? else {
        return Ok(());
    };
    if let Some(word) = FourLetterWord::parse(&header) {
        debug!(connection_id, word = word.as_str(), "status word");
        writer
            .write_all(handler.four_letter(word).as_bytes())
            .and_then(|_| writer.flush())
            .map_err(NetworkError::Io)?;
        return Ok(());
    }

    let body = read_frame_body(&mut reader, header, max_frame)?;
    let request: ConnectRequest = decode_body(&body)?;
    let (outbound, inbound) = mpsc::unbounded_channel();
    let response = handler.connect(connection_id, request, outbound.clone());
    if !response.is_expired() {
        *session_slot = Some(response.session_id);
        shared.connections.bind(connection_id, response.session_id, outbound.clone());
    }
    write_frame(&mut writer, &response)?;
    let Some(session_id) = *session_slot else {
        return Ok(());
    };
    thread::Builder::new()
        .name(format!("keeper-writer-{connection_id}"))
        .spawn(move || write_loop(writer, inbound, connection_id))
        .map_err(NetworkError::Io)?;

    loop {
        let Some(body) = read_frame(&mut reader, max_frame)? else {
            return Ok(());
        };
        let frame: RequestFrame = decode_body(&body)?;
        let reply = handler.process(session_id, frame);
        if outbound.send(reply).is_err() {
            return Err(Error::from(NetworkError::Protocol("outbound queue closed".into())));
        }
    }
}

/// Ends when every sender of the queue is gone or after writing a message
/// that closes the connection.
fn write_loop(
    mut stream: TcpStream,
    mut inbound: UnboundedReceiver<ServerMessage>,
    connection_id: ConnectionId,
) {
    while let Some(message) = inbound.blocking_recv() {
        let last = ends_connection(&message);
        if let Err(e) = write_frame(&mut stream, &message) {
            debug!(connection_id, "write failed: {}", e);
            break;
        }
        if last {
            break;
        }
    }
    let _ = stream.shutdown(Shutdown::Both);
}
