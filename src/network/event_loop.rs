//! Event-loop transport: one tokio task per connection on the ambient runtime.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::SinkExt;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::task::JoinSet;
use tokio_util::codec::Framed;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::ends_connection;
use super::ConnectionTable;
use super::Transport;
use crate::constants::FRAME_HEADER_LEN;
use crate::proto::decode_body;
use crate::proto::encode_body;
use crate::proto::frame_codec;
use crate::ConnectRequest;
use crate::ConnectionId;
use crate::FourLetterWord;
use crate::LifecycleError;
use crate::NetworkError;
use crate::RequestFrame;
use crate::RequestHandler;
use crate::Result;
use crate::ServerMessage;
use crate::SessionId;
use crate::TransportKind;

struct Running {
    shutdown_tx: watch::Sender<()>,
    acceptor: JoinHandle<()>,
    local_addr: SocketAddr,
}

pub struct EventLoopTransport {
    running: Mutex<Option<Running>>,
    connections: Arc<ConnectionTable>,
}

impl std::fmt::Debug for EventLoopTransport {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("EventLoopTransport")
            .field("local_addr", &self.local_addr())
            .field("connections", &self.connections.len())
            .finish()
    }
}

impl Default for EventLoopTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoopTransport {
    pub fn new() -> Self {
        Self {
            running: Mutex::new(None),
            connections: Arc::new(ConnectionTable::new()),
        }
    }
}

impl Transport for EventLoopTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::EventLoop
    }

    /// Must be called from within a tokio runtime.
    fn start(
        &self,
        handler: Arc<dyn RequestHandler>,
        listen_address: SocketAddr,
    ) -> Result<SocketAddr> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(LifecycleError::AlreadyRunning.into());
        }
        let runtime = Handle::try_current().map_err(|e| {
            NetworkError::Protocol(format!("event loop transport needs a tokio runtime: {e}"))
        })?;

        let bind_error = |e| NetworkError::Bind {
            address: listen_address.to_string(),
            source: e,
        };
        let std_listener = std::net::TcpListener::bind(listen_address).map_err(bind_error)?;
        std_listener.set_nonblocking(true).map_err(bind_error)?;
        let local_addr = std_listener.local_addr().map_err(bind_error)?;
        let listener = {
            let _enter = runtime.enter();
            TcpListener::from_std(std_listener).map_err(bind_error)?
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let acceptor = runtime.spawn(accept_loop(
            listener,
            handler,
            self.connections.clone(),
            shutdown_rx,
        ));
        *running = Some(Running {
            shutdown_tx,
            acceptor,
            local_addr,
        });
        info!(%local_addr, "event loop transport listening");
        Ok(local_addr)
    }

    fn shutdown(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let Some(running) = self.running.lock().take() else {
                return;
            };
            if running.shutdown_tx.send(()).is_err() {
                debug!("acceptor already gone");
            }
            if let Err(e) = running.acceptor.await {
                error!("acceptor task failed: {}", e);
            }
            self.connections.clear();
            info!(local_addr = %running.local_addr, "event loop transport stopped");
        })
    }

    fn send(
        &self,
        session_id: SessionId,
        message: ServerMessage,
    ) -> bool {
        self.connections.send(session_id, message)
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|r| r.local_addr)
    }

    fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

/// Accepts until shutdown, then waits for every connection task so the
/// port and all sockets are released when it returns.
async fn accept_loop(
    listener: TcpListener,
    handler: Arc<dyn RequestHandler>,
    connections: Arc<ConnectionTable>,
    mut shutdown_rx: watch::Receiver<()>,
) {
    let mut tasks = JoinSet::new();
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let connection_id = connections.next_id();
                    trace!(connection_id, %peer, "connection accepted");
                    tasks.spawn(serve_connection(
                        stream,
                        connection_id,
                        handler.clone(),
                        connections.clone(),
                        shutdown_rx.clone(),
                    ));
                }
                Err(e) => warn!("accept failed: {}", e),
            },
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    error!("connection task failed: {}", e);
                }
            }
        }
    }
    drop(listener);
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!("connection task failed: {}", e);
        }
    }
    debug!("acceptor stopped");
}

async fn serve_connection(
    stream: TcpStream,
    connection_id: ConnectionId,
    handler: Arc<dyn RequestHandler>,
    connections: Arc<ConnectionTable>,
    shutdown_rx: watch::Receiver<()>,
) {
    if !handler.connection_opened(connection_id) {
        return;
    }
    let mut session_id = None;
    if let Err(e) = run_connection(
        stream,
        connection_id,
        &handler,
        &connections,
        shutdown_rx,
        &mut session_id,
    )
    .await
    {
        debug!(connection_id, "connection ended: {}", e);
    }
    connections.remove(connection_id);
    handler.connection_closed(connection_id, session_id);
    trace!(connection_id, "connection closed");
}

async fn run_connection(
    mut stream: TcpStream,
    connection_id: ConnectionId,
    handler: &Arc<dyn RequestHandler>,
    connections: &ConnectionTable,
    mut shutdown_rx: watch::Receiver<()>,
    session_slot: &mut Option<SessionId>,
) -> Result<()> {
    let max_frame = handler.max_frame_len();

    // The first four bytes are either a status word or the length of the
    // connect frame.
    let mut header = [0u8; FRAME_HEADER_LEN];
    tokio::select! {
        _ = shutdown_rx.changed() => return Ok(()),
        read = stream.read_exact(&mut header) => match read {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(NetworkError::Io(e).into()),
        }
    }
    if let Some(word) = FourLetterWord::parse(&header) {
        debug!(connection_id, word = word.as_str(), "status word");
        stream
            .write_all(handler.four_letter(word).as_bytes())
            .await
            .map_err(NetworkError::Io)?;
        stream.shutdown().await.map_err(NetworkError::Io)?;
        return Ok(());
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > max_frame {
        return Err(NetworkError::FrameTooLarge { len, max: max_frame }.into());
    }
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await.map_err(NetworkError::Io)?;
    let request: ConnectRequest = decode_body(&body)?;

    // Handler calls may commit and sync the log, so they leave the reactor
    let (outbound, mut inbound) = mpsc::unbounded_channel();
    let worker = handler.clone();
    let sender = outbound.clone();
    let response = tokio::task::spawn_blocking(move || worker.connect(connection_id, request, sender))
        .await
        .map_err(NetworkError::TaskFailed)?;
    if !response.is_expired() {
        *session_slot = Some(response.session_id);
        connections.bind(connection_id, response.session_id, outbound.clone());
    }
    let mut framed = Framed::new(stream, frame_codec(max_frame));
    framed
        .send(Bytes::from(encode_body(&response)?))
        .await
        .map_err(NetworkError::Io)?;
    let Some(session_id) = *session_slot else {
        return Ok(());
    };

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => return Ok(()),
            frame = framed.next() => match frame {
                Some(Ok(bytes)) => {
                    let frame: RequestFrame = decode_body(&bytes)?;
                    let worker = handler.clone();
                    let reply = tokio::task::spawn_blocking(move || worker.process(session_id, frame))
                        .await
                        .map_err(NetworkError::TaskFailed)?;
                    if outbound.send(reply).is_err() {
                        return Err(NetworkError::Protocol("outbound queue closed".into()).into());
                    }
                }
                Some(Err(e)) => return Err(NetworkError::Io(e).into()),
                None => return Ok(()),
            },
            message = inbound.recv() => match message {
                Some(message) => {
                    let last = ends_connection(&message);
                    framed
                        .send(Bytes::from(encode_body(&message)?))
                        .await
                        .map_err(NetworkError::Io)?;
                    if last {
                        return Ok(());
                    }
                }
                None => return Ok(()),
            },
        }
    }
}
