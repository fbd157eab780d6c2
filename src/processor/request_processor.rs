//! Validates client operations and runs them against the committed state.
//!
//! Every request moves through `Received -> Validated -> Applied -> Responded`
//! or ends `Rejected` without touching the tree. Reads run under the state
//! read lock and register their watch inside it; writes go through
//! [`KeeperDatabase::commit`].

use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::render_four_letter;
use super::RequestHandler;
use super::ServerStats;
use crate::metrics::record_request;
use crate::metrics::record_session_event;
use crate::metrics::record_watch_events;
use crate::proto::max_frame_len;
use crate::session_password;
use crate::tree::path::validate_path;
use crate::Applied;
use crate::ConnectRequest;
use crate::ConnectResponse;
use crate::ConnectionId;
use crate::DatabaseState;
use crate::Error;
use crate::FourLetterWord;
use crate::KeeperConfig;
use crate::KeeperDatabase;
use crate::KeeperError;
use crate::OpResult;
use crate::OutboundSender;
use crate::Request;
use crate::RequestFrame;
use crate::Response;
use crate::Result;
use crate::ServerMessage;
use crate::SessionId;
use crate::SessionRegistry;
use crate::Txn;
use crate::WatchKind;
use crate::WatchedEvent;

pub struct RequestProcessor {
    db: Arc<KeeperDatabase>,
    sessions: Arc<SessionRegistry>,
    max_data_bytes: usize,
    max_connections: usize,
    /// False while loading, stopping, or after a fatal storage failure
    accepting: AtomicBool,
    alive_connections: AtomicUsize,
    outstanding: AtomicUsize,
    packets_received: AtomicU64,
    packets_sent: AtomicU64,
}

impl std::fmt::Debug for RequestProcessor {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("RequestProcessor")
            .field("accepting", &self.is_accepting())
            .field("alive_connections", &self.alive_connections)
            .finish_non_exhaustive()
    }
}

impl RequestProcessor {
    pub fn new(
        config: &KeeperConfig,
        db: Arc<KeeperDatabase>,
        sessions: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            db,
            sessions,
            max_data_bytes: config.tree.max_data_bytes,
            max_connections: config.server.max_client_connections,
            accepting: AtomicBool::new(false),
            alive_connections: AtomicUsize::new(0),
            outstanding: AtomicUsize::new(0),
            packets_received: AtomicU64::new(0),
            packets_sent: AtomicU64::new(0),
        }
    }

    pub fn set_accepting(
        &self,
        accepting: bool,
    ) {
        self.accepting.store(accepting, Ordering::SeqCst);
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    pub fn database(&self) -> &Arc<KeeperDatabase> {
        &self.db
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Re-tracks sessions recovered from disk with fresh deadlines. Clients
    /// that do not come back in time are expired by the sweep.
    pub fn restore_sessions(
        &self,
        recovered: &BTreeMap<SessionId, u64>,
    ) {
        for (session_id, timeout_ms) in recovered {
            self.sessions.add_session(*session_id, *timeout_ms);
        }
        if !recovered.is_empty() {
            info!(count = recovered.len(), "recovered sessions re-tracked");
        }
    }

    /// Opens a logged session with a negotiated timeout.
    ///
    /// The session is tracked before it is logged and the accepting flag is
    /// checked under the commit lock, so a shutdown that has stopped
    /// accepting sees every session that made it into the log.
    pub fn create_session(
        &self,
        timeout_hint_ms: u64,
    ) -> Result<(SessionId, u64)> {
        let (session_id, timeout_ms) = self.sessions.create_session(timeout_hint_ms);
        let committed = self.db.commit(session_id, self.sessions.as_ref(), |_| {
            if !self.is_accepting() {
                return Err(KeeperError::ConnectionLoss);
            }
            Ok(Txn::CreateSession { timeout_ms })
        });
        if let Err(e) = committed {
            self.sessions.remove(session_id);
            return Err(e);
        }
        record_session_event("created");
        info!(session_id, timeout_ms, "session established");
        Ok((session_id, timeout_ms))
    }

    /// Destroys a session: its ephemerals are deleted (firing their watches),
    /// its own watches dropped and its queue closed.
    ///
    /// If the close cannot be logged the session stays tracked, closing, and
    /// the next sweep tries again.
    pub fn close_session(
        &self,
        session_id: SessionId,
    ) -> Result<()> {
        self.sessions.set_closing(session_id);
        let committed = self.db.commit(session_id, self.sessions.as_ref(), |state| {
            require_session(state, session_id)?;
            Ok(Txn::CloseSession)
        });
        let committed = match committed {
            Ok(committed) => committed,
            Err(e) if matches!(e.keeper_error(), Some(KeeperError::SessionExpired)) => {
                self.sessions.remove(session_id);
                return Err(e);
            }
            Err(e) => {
                warn!(session_id, "session close not logged, retrying on the next sweep: {}", e);
                self.sessions.retry_close(session_id);
                return Err(e);
            }
        };
        self.sessions.remove(session_id);
        record_watch_events(committed.fired);
        if let Applied::SessionClosed { removed } = &committed.applied {
            debug!(session_id, ephemerals = removed.len(), "session closed");
        }
        Ok(())
    }

    /// Destroys every session past its deadline. Returns how many went.
    pub fn expire_sessions(&self) -> usize {
        let expired = self.sessions.expire_check();
        for session_id in &expired {
            self.sessions.send(*session_id, ServerMessage::Event(WatchedEvent::expired()));
            match self.close_session(*session_id) {
                Ok(()) => {
                    record_session_event("expired");
                    info!(session_id, "session expired");
                }
                Err(e) => self.on_internal_error("expire session", e),
            }
        }
        expired.len()
    }

    /// Destroys all live sessions; part of an orderly shutdown. Expected to
    /// run after accepting stopped, so no session can be logged afterwards.
    pub fn close_all_sessions(&self) -> usize {
        let mut ids = self.db.logged_session_ids();
        ids.extend(self.sessions.session_ids());
        ids.sort_unstable();
        ids.dedup();
        for session_id in &ids {
            if let Err(e) = self.close_session(*session_id) {
                warn!(session_id, "failed to close session on shutdown: {}", e);
            }
        }
        ids.len()
    }

    pub fn stats(&self) -> ServerStats {
        let watches = self.db.watches();
        ServerStats {
            serving: self.is_accepting(),
            session_count: self.sessions.session_count(),
            alive_connections: self.alive_connections.load(Ordering::Relaxed),
            node_count: self.db.node_count(),
            watch_count: watches.watch_count(),
            watched_paths: watches.watched_path_count(),
            ephemeral_count: self.db.ephemeral_count(),
            approximate_data_size: self.db.approximate_data_size(),
            last_zxid: self.db.last_zxid(),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            outstanding_requests: self.outstanding.load(Ordering::Relaxed),
        }
    }

    fn execute(
        &self,
        session_id: SessionId,
        request: Request,
    ) -> OpResult {
        match request {
            Request::Create { path, data, mode } => {
                validate_path(&path, mode.is_sequential())?;
                self.check_data_len(&data)?;
                let ephemeral_owner = if mode.is_ephemeral() { session_id } else { 0 };
                let committed = self
                    .db
                    .commit(session_id, self.sessions.as_ref(), |state| {
                        require_session(state, session_id)?;
                        let final_path = if mode.is_sequential() {
                            state.tree.sequential_path(&path)?
                        } else {
                            path.clone()
                        };
                        state.tree.check_create(&final_path)?;
                        Ok(Txn::Create {
                            path: final_path,
                            data,
                            ephemeral_owner,
                        })
                    })
                    .map_err(|e| self.to_keeper_error(e))?;
                record_watch_events(committed.fired);
                match committed.applied {
                    Applied::Created { path, stat } => Ok(Response::Create { path, stat }),
                    _ => Err(KeeperError::Unimplemented),
                }
            }
            Request::Delete { path, version } => {
                validate_path(&path, false)?;
                let committed = self
                    .db
                    .commit(session_id, self.sessions.as_ref(), |state| {
                        require_session(state, session_id)?;
                        state.tree.check_delete(&path, version)?;
                        Ok(Txn::Delete { path: path.clone() })
                    })
                    .map_err(|e| self.to_keeper_error(e))?;
                record_watch_events(committed.fired);
                Ok(Response::Delete)
            }
            Request::SetData {
                path,
                data,
                version,
            } => {
                validate_path(&path, false)?;
                self.check_data_len(&data)?;
                let committed = self
                    .db
                    .commit(session_id, self.sessions.as_ref(), |state| {
                        require_session(state, session_id)?;
                        state.tree.check_set_data(&path, version)?;
                        let next = state.tree.stat_node(&path).map(|s| s.version + 1).unwrap_or(1);
                        Ok(Txn::SetData {
                            path: path.clone(),
                            data,
                            version: next,
                        })
                    })
                    .map_err(|e| self.to_keeper_error(e))?;
                record_watch_events(committed.fired);
                match committed.applied {
                    Applied::DataSet { stat } => Ok(Response::SetData { stat }),
                    _ => Err(KeeperError::Unimplemented),
                }
            }
            Request::Exists { path, watch } => {
                validate_path(&path, false)?;
                let stat = self.db.read(|state| {
                    let stat = state.tree.stat_node(&path);
                    // A watch on a missing node fires when it is created
                    if watch {
                        self.register_watch(&path, session_id, WatchKind::Data);
                    }
                    stat
                });
                Ok(Response::Exists { stat })
            }
            Request::GetData { path, watch } => {
                validate_path(&path, false)?;
                let (data, stat) = self.db.read(|state| {
                    let found = state.tree.get_data(&path)?;
                    if watch {
                        self.register_watch(&path, session_id, WatchKind::Data);
                    }
                    Ok::<_, KeeperError>(found)
                })?;
                Ok(Response::GetData { data, stat })
            }
            Request::GetChildren { path, watch } => {
                validate_path(&path, false)?;
                let (children, stat) = self.db.read(|state| {
                    let found = state.tree.get_children(&path)?;
                    if watch {
                        self.register_watch(&path, session_id, WatchKind::Child);
                    }
                    Ok::<_, KeeperError>(found)
                })?;
                Ok(Response::GetChildren { children, stat })
            }
            Request::Ping => Ok(Response::Ping),
            Request::CloseSession => {
                self.close_session(session_id).map_err(|e| self.to_keeper_error(e))?;
                record_session_event("closed");
                Ok(Response::CloseSession)
            }
        }
    }

    /// Called with the state read lock held, so no commit can slip between
    /// the read and the registration.
    fn register_watch(
        &self,
        path: &str,
        session_id: SessionId,
        kind: WatchKind,
    ) {
        if self.sessions.is_live(session_id) {
            self.db.watches().register(path, session_id, kind);
        }
    }

    fn check_data_len(
        &self,
        data: &[u8],
    ) -> std::result::Result<(), KeeperError> {
        if data.len() > self.max_data_bytes {
            return Err(KeeperError::BadArguments);
        }
        Ok(())
    }

    fn to_keeper_error(
        &self,
        e: Error,
    ) -> KeeperError {
        match e.keeper_error() {
            Some(keeper_error) => keeper_error,
            None => {
                self.on_internal_error("commit", e);
                KeeperError::ConnectionLoss
            }
        }
    }

    fn on_internal_error(
        &self,
        context: &str,
        e: Error,
    ) {
        if e.is_fatal() {
            error!("{} hit an unrecoverable error, refusing further requests: {}", context, e);
            self.set_accepting(false);
        } else {
            error!("{} failed: {}", context, e);
        }
    }
}

impl RequestHandler for RequestProcessor {
    fn connection_opened(
        &self,
        connection_id: ConnectionId,
    ) -> bool {
        if !self.is_accepting() {
            return false;
        }
        let alive = self.alive_connections.fetch_add(1, Ordering::SeqCst);
        if self.max_connections > 0 && alive >= self.max_connections {
            self.alive_connections.fetch_sub(1, Ordering::SeqCst);
            warn!(connection_id, alive, "too many client connections");
            return false;
        }
        true
    }

    fn connect(
        &self,
        connection_id: ConnectionId,
        request: ConnectRequest,
        outbound: OutboundSender,
    ) -> ConnectResponse {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        if !self.is_accepting() {
            return ConnectResponse::expired();
        }
        let last_zxid = self.db.last_zxid();
        if request.last_zxid_seen > last_zxid {
            warn!(
                connection_id,
                client_zxid = request.last_zxid_seen,
                last_zxid,
                "refusing client that has seen a newer state than this server"
            );
            return ConnectResponse::expired();
        }

        let response = if request.session_id == 0 {
            match self.create_session(request.timeout_ms) {
                Ok((session_id, timeout_ms)) => {
                    if self.sessions.attach(session_id, connection_id, outbound).is_err() {
                        ConnectResponse::expired()
                    } else {
                        ConnectResponse {
                            session_id,
                            timeout_ms,
                            passwd: session_password(session_id),
                        }
                    }
                }
                Err(e) if e.keeper_error().is_some() => {
                    debug!(connection_id, "session not created: {}", e);
                    ConnectResponse::expired()
                }
                Err(e) => {
                    self.on_internal_error("create session", e);
                    ConnectResponse::expired()
                }
            }
        } else {
            let session_id = request.session_id;
            let passwd = session_password(session_id);
            match self.sessions.timeout_of(session_id) {
                Some(timeout_ms)
                    if passwd == request.passwd
                        && self.sessions.attach(session_id, connection_id, outbound).is_ok() =>
                {
                    record_session_event("resumed");
                    info!(session_id, connection_id, "session resumed");
                    ConnectResponse {
                        session_id,
                        timeout_ms,
                        passwd,
                    }
                }
                _ => {
                    debug!(session_id, connection_id, "refusing to resume session");
                    ConnectResponse::expired()
                }
            }
        };
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        response
    }

    fn process(
        &self,
        session_id: SessionId,
        frame: RequestFrame,
    ) -> ServerMessage {
        let started = Instant::now();
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.outstanding.fetch_add(1, Ordering::SeqCst);

        let op = frame.request.op_name();
        let result = if !self.is_accepting() {
            Err(KeeperError::ConnectionLoss)
        } else {
            match self.sessions.touch(session_id) {
                Ok(()) => self.execute(session_id, frame.request),
                Err(e) => Err(e),
            }
        };

        let label = match &result {
            Ok(_) => "ok",
            Err(e) => e.label(),
        };
        record_request(op, label, started.elapsed().as_secs_f64() * 1000.0);
        if let Err(e) = &result {
            debug!(session_id, xid = frame.xid, op, "request rejected: {}", e);
        }

        self.outstanding.fetch_sub(1, Ordering::SeqCst);
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        ServerMessage::Reply {
            xid: frame.xid,
            zxid: self.db.last_zxid(),
            result,
        }
    }

    fn connection_closed(
        &self,
        connection_id: ConnectionId,
        session_id: Option<SessionId>,
    ) {
        self.alive_connections.fetch_sub(1, Ordering::SeqCst);
        if let Some(session_id) = session_id {
            self.sessions.detach(session_id, connection_id);
        }
    }

    fn four_letter(
        &self,
        word: FourLetterWord,
    ) -> String {
        render_four_letter(word, &self.stats())
    }

    fn max_frame_len(&self) -> usize {
        max_frame_len(self.max_data_bytes)
    }
}

/// Changes are only logged for sessions the committed state still knows;
/// checked under the commit lock so a concurrent close cannot slip between.
fn require_session(
    state: &DatabaseState,
    session_id: SessionId,
) -> std::result::Result<(), KeeperError> {
    if !state.sessions.contains_key(&session_id) {
        return Err(KeeperError::SessionExpired);
    }
    Ok(())
}
