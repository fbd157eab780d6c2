use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::SinkExt;
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::interval_at;
use tokio::time::timeout;
use tokio::time::Instant;
use tokio_util::codec::Framed;
use tokio_util::codec::LengthDelimitedCodec;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use super::ClientConfig;
use super::ClientError;
use super::ClientResult;
use crate::proto::decode_body;
use crate::proto::encode_body;
use crate::proto::frame_codec;
use crate::ConnectRequest;
use crate::ConnectResponse;
use crate::CreateMode;
use crate::KeeperState;
use crate::Request;
use crate::RequestFrame;
use crate::Response;
use crate::ServerMessage;
use crate::SessionId;
use crate::Stat;
use crate::WatchedEvent;

/// Correlation id of keep-alive pings; replies to it are dropped
const PING_XID: i32 = -2;

/// Queued calls before `call` waits for the connection task
const CALL_QUEUE_DEPTH: usize = 1024;

struct Call {
    request: Request,
    reply: oneshot::Sender<ClientResult<Response>>,
}

/// Asynchronous session with one server.
///
/// A background task owns the socket: it matches replies to requests by
/// xid, forwards watch events to [`KeeperClient::next_event`] and pings the
/// server every third of the session timeout.
pub struct KeeperClient {
    session_id: SessionId,
    passwd: Vec<u8>,
    timeout_ms: u64,
    config: ClientConfig,
    calls: mpsc::Sender<Call>,
    events: Mutex<mpsc::UnboundedReceiver<WatchedEvent>>,
    connected: Arc<AtomicBool>,
    io_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for KeeperClient {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("KeeperClient")
            .field("session_id", &format_args!("{:#x}", self.session_id))
            .field("timeout_ms", &self.timeout_ms)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl KeeperClient {
    /// Opens a new session
    pub async fn connect(
        addr: SocketAddr,
        config: ClientConfig,
    ) -> ClientResult<Self> {
        Self::handshake(addr, config, 0, Vec::new()).await
    }

    /// Resumes an existing session on a new connection.
    ///
    /// # Errors
    /// `SessionExpired` if the server no longer knows the session or the
    /// password does not match.
    pub async fn connect_with_session(
        addr: SocketAddr,
        config: ClientConfig,
        session_id: SessionId,
        passwd: Vec<u8>,
    ) -> ClientResult<Self> {
        Self::handshake(addr, config, session_id, passwd).await
    }

    async fn handshake(
        addr: SocketAddr,
        config: ClientConfig,
        session_id: SessionId,
        passwd: Vec<u8>,
    ) -> ClientResult<Self> {
        let request = ConnectRequest {
            session_id,
            timeout_ms: config.session_timeout.as_millis() as u64,
            passwd,
            last_zxid_seen: 0,
        };
        let exchange = async {
            let stream = TcpStream::connect(addr).await?;
            stream.set_nodelay(true)?;
            let mut framed = Framed::new(stream, frame_codec(config.max_frame_len));
            framed.send(encode(&request)?).await?;
            let body = match framed.next().await {
                Some(body) => body?,
                None => return Err(ClientError::ConnectionLoss),
            };
            let response: ConnectResponse = decode(&body)?;
            Ok((framed, response))
        };
        let (framed, response) = timeout(config.connect_timeout, exchange)
            .await
            .map_err(|_| ClientError::ConnectionLoss)??;
        if response.is_expired() {
            debug!(session_id, "server refused the session");
            return Err(ClientError::SessionExpired);
        }
        debug!(session_id = response.session_id, timeout_ms = response.timeout_ms, %addr, "session established");

        let (calls_tx, calls_rx) = mpsc::channel(CALL_QUEUE_DEPTH);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(true));
        let ping_every = Duration::from_millis((response.timeout_ms / 3).max(1));
        let io_task = tokio::spawn(run_io(
            framed,
            calls_rx,
            events_tx,
            ping_every,
            connected.clone(),
        ));

        Ok(Self {
            session_id: response.session_id,
            passwd: response.passwd,
            timeout_ms: response.timeout_ms,
            config,
            calls: calls_tx,
            events: Mutex::new(events_rx),
            connected,
            io_task: std::sync::Mutex::new(Some(io_task)),
        })
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Password needed to resume this session elsewhere
    pub fn session_password(&self) -> &[u8] {
        &self.passwd
    }

    /// Timeout the server granted
    pub fn session_timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Returns the final path, which carries the suffix for sequential modes
    pub async fn create(
        &self,
        path: &str,
        data: impl Into<Vec<u8>>,
        mode: CreateMode,
    ) -> ClientResult<String> {
        let request = Request::Create {
            path: path.to_string(),
            data: data.into(),
            mode,
        };
        match self.call(request).await? {
            Response::Create { path, .. } => Ok(path),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn get_data(
        &self,
        path: &str,
        watch: bool,
    ) -> ClientResult<(Vec<u8>, Stat)> {
        let request = Request::GetData {
            path: path.to_string(),
            watch,
        };
        match self.call(request).await? {
            Response::GetData { data, stat } => Ok((data, stat)),
            other => Err(unexpected(&other)),
        }
    }

    /// `version` -1 matches any version
    pub async fn set_data(
        &self,
        path: &str,
        data: impl Into<Vec<u8>>,
        version: i32,
    ) -> ClientResult<Stat> {
        let request = Request::SetData {
            path: path.to_string(),
            data: data.into(),
            version,
        };
        match self.call(request).await? {
            Response::SetData { stat } => Ok(stat),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn delete(
        &self,
        path: &str,
        version: i32,
    ) -> ClientResult<()> {
        let request = Request::Delete {
            path: path.to_string(),
            version,
        };
        match self.call(request).await? {
            Response::Delete => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    /// `None` when the node does not exist; a watch is placed either way.
    pub async fn exists(
        &self,
        path: &str,
        watch: bool,
    ) -> ClientResult<Option<Stat>> {
        let request = Request::Exists {
            path: path.to_string(),
            watch,
        };
        match self.call(request).await? {
            Response::Exists { stat } => Ok(stat),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn get_children(
        &self,
        path: &str,
        watch: bool,
    ) -> ClientResult<Vec<String>> {
        let request = Request::GetChildren {
            path: path.to_string(),
            watch,
        };
        match self.call(request).await? {
            Response::GetChildren { children, .. } => Ok(children),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn ping(&self) -> ClientResult<()> {
        match self.call(Request::Ping).await? {
            Response::Ping => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    /// Next watch or session event, waiting at most `within`
    pub async fn next_event(
        &self,
        within: Duration,
    ) -> Option<WatchedEvent> {
        let mut events = self.events.lock().await;
        timeout(within, events.recv()).await.ok().flatten()
    }

    /// Ends the session: the server removes its ephemeral nodes and watches.
    pub async fn close(&self) -> ClientResult<()> {
        let result = match self.call(Request::CloseSession).await {
            Ok(Response::CloseSession) => Ok(()),
            Ok(other) => Err(unexpected(&other)),
            Err(e) => Err(e),
        };
        let io_task = self.io_task.lock().ok().and_then(|mut task| task.take());
        if let Some(io_task) = io_task {
            if timeout(self.config.request_timeout, io_task).await.is_err() {
                warn!(session_id = self.session_id, "connection task did not stop after close");
            }
        }
        result
    }

    async fn call(
        &self,
        request: Request,
    ) -> ClientResult<Response> {
        let (reply, reply_rx) = oneshot::channel();
        self.calls
            .send(Call { request, reply })
            .await
            .map_err(|_| ClientError::ConnectionLoss)?;
        match timeout(self.config.request_timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClientError::ConnectionLoss),
            Err(_) => {
                warn!(session_id = self.session_id, "request timed out");
                Err(ClientError::ConnectionLoss)
            }
        }
    }
}

async fn run_io(
    mut framed: Framed<TcpStream, LengthDelimitedCodec>,
    mut calls: mpsc::Receiver<Call>,
    events: mpsc::UnboundedSender<WatchedEvent>,
    ping_every: Duration,
    connected: Arc<AtomicBool>,
) {
    let mut pending: HashMap<i32, oneshot::Sender<ClientResult<Response>>> = HashMap::new();
    let mut next_xid: i32 = 1;
    let mut pinger = interval_at(Instant::now() + ping_every, ping_every);

    let reason = loop {
        tokio::select! {
            call = calls.recv() => {
                let Some(Call { request, reply }) = call else {
                    break ClientError::ConnectionLoss;
                };
                let xid = next_xid;
                next_xid = if next_xid == i32::MAX { 1 } else { next_xid + 1 };
                let body = match encode(&RequestFrame { xid, request }) {
                    Ok(body) => body,
                    Err(e) => {
                        let _ = reply.send(Err(e));
                        continue;
                    }
                };
                pending.insert(xid, reply);
                if let Err(e) = framed.send(body).await {
                    break ClientError::Io(e);
                }
            }
            frame = framed.next() => {
                let body = match frame {
                    Some(Ok(body)) => body,
                    Some(Err(e)) => break ClientError::Io(e),
                    None => break ClientError::ConnectionLoss,
                };
                match decode::<ServerMessage>(&body) {
                    Ok(ServerMessage::Reply { xid, result, .. }) => {
                        if xid == PING_XID {
                            trace!("ping answered");
                        } else if let Some(reply) = pending.remove(&xid) {
                            let _ = reply.send(result.map_err(ClientError::from));
                        } else {
                            warn!(xid, "reply for an unknown request");
                        }
                    }
                    Ok(ServerMessage::Event(event)) => {
                        let expired = event.state == KeeperState::Expired;
                        let _ = events.send(event);
                        if expired {
                            break ClientError::SessionExpired;
                        }
                    }
                    Err(e) => break e,
                }
            }
            _ = pinger.tick() => {
                let ping = RequestFrame { xid: PING_XID, request: Request::Ping };
                match encode(&ping) {
                    Ok(body) => {
                        if let Err(e) = framed.send(body).await {
                            break ClientError::Io(e);
                        }
                    }
                    Err(e) => break e,
                }
            }
        }
    };

    connected.store(false, Ordering::SeqCst);
    debug!("connection closed: {}", reason);
    for (_, reply) in pending.drain() {
        let _ = reply.send(Err(reason.for_pending()));
    }
    calls.close();
    while let Ok(call) = calls.try_recv() {
        let _ = call.reply.send(Err(reason.for_pending()));
    }
}

fn encode<T: serde::Serialize>(msg: &T) -> ClientResult<Bytes> {
    encode_body(msg)
        .map(Bytes::from)
        .map_err(|e| ClientError::Protocol(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(body: &[u8]) -> ClientResult<T> {
    decode_body(body).map_err(|e| ClientError::Protocol(e.to_string()))
}

fn unexpected(response: &Response) -> ClientError {
    ClientError::Protocol(format!("unexpected response {response:?}"))
}
