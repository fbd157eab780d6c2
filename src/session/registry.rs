//! Live client sessions and their expiration deadlines.
//!
//! Deadlines are rounded up to the tick and grouped into buckets so the
//! periodic sweep only inspects buckets whose time has passed.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::RngCore;
use rand::SeedableRng;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::info;
use tracing::trace;

use crate::constants::SESSION_PASSWD_LEN;
use crate::constants::SESSION_PASSWD_SECRET;
use crate::utils::time::now_millis;
use crate::utils::time::round_up_to_interval;
use crate::EventSink;
use crate::KeeperError;
use crate::ServerConfig;
use crate::ServerMessage;
use crate::SessionId;
use crate::WatchedEvent;

/// Outbound queue of a connection; the transport writes whatever arrives.
pub type OutboundSender = mpsc::UnboundedSender<ServerMessage>;

/// Transport-assigned connection identifier
pub type ConnectionId = u64;

#[derive(Debug)]
struct Session {
    timeout_ms: u64,
    /// Bucket the session currently sits in
    expires_at: u64,
    /// Set once expiration or close began; no request is accepted after that
    closing: bool,
    connection: Option<(ConnectionId, OutboundSender)>,
}

#[derive(Debug, Default)]
struct Inner {
    sessions: HashMap<SessionId, Session>,
    buckets: BTreeMap<u64, HashSet<SessionId>>,
}

impl Inner {
    fn move_to_bucket(
        &mut self,
        session_id: SessionId,
        expires_at: u64,
    ) {
        let Some(session) = self.sessions.get_mut(&session_id) else {
            return;
        };
        let previous = session.expires_at;
        if previous == expires_at {
            return;
        }
        session.expires_at = expires_at;
        remove_from_bucket(&mut self.buckets, previous, session_id);
        self.buckets.entry(expires_at).or_default().insert(session_id);
    }
}

fn remove_from_bucket(
    buckets: &mut BTreeMap<u64, HashSet<SessionId>>,
    expires_at: u64,
    session_id: SessionId,
) {
    if let Some(bucket) = buckets.get_mut(&expires_at) {
        bucket.remove(&session_id);
        if bucket.is_empty() {
            buckets.remove(&expires_at);
        }
    }
}

/// Tracks every live session: negotiated timeout, deadline and the
/// connection currently serving it.
#[derive(Debug)]
pub struct SessionRegistry {
    inner: Mutex<Inner>,
    next_session_id: AtomicU64,
    tick_ms: u64,
    min_timeout_ms: u64,
    max_timeout_ms: u64,
}

impl SessionRegistry {
    pub fn new(config: &ServerConfig) -> Self {
        let (min_timeout_ms, max_timeout_ms) = config.session_timeout_bounds();
        Self {
            inner: Mutex::new(Inner::default()),
            next_session_id: AtomicU64::new(initial_session_id(now_millis())),
            tick_ms: config.tick_time_ms,
            min_timeout_ms,
            max_timeout_ms,
        }
    }

    /// Clamps a client's requested timeout into the configured bounds
    pub fn negotiate_timeout(
        &self,
        requested_ms: u64,
    ) -> u64 {
        requested_ms.clamp(self.min_timeout_ms, self.max_timeout_ms)
    }

    /// Hands out a fresh id; ids are never reused within the process.
    pub fn allocate_id(&self) -> SessionId {
        self.next_session_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Makes sure ids allocated from now on are above `session_id`.
    /// Called for every session recovered from disk.
    pub fn advance_past(
        &self,
        session_id: SessionId,
    ) {
        self.next_session_id.fetch_max(session_id.saturating_add(1), Ordering::SeqCst);
    }

    /// Allocates an id and starts tracking it. Returns the id and the
    /// negotiated timeout.
    pub fn create_session(
        &self,
        timeout_hint_ms: u64,
    ) -> (SessionId, u64) {
        let session_id = self.allocate_id();
        let timeout_ms = self.negotiate_timeout(timeout_hint_ms);
        self.add_session(session_id, timeout_ms);
        (session_id, timeout_ms)
    }

    /// Starts tracking `session_id` with a fresh deadline. Re-adding a
    /// known session only refreshes its deadline.
    pub fn add_session(
        &self,
        session_id: SessionId,
        timeout_ms: u64,
    ) {
        self.advance_past(session_id);
        let expires_at = self.deadline(now_millis(), timeout_ms);
        let mut inner = self.inner.lock();
        if inner.sessions.contains_key(&session_id) {
            inner.move_to_bucket(session_id, expires_at);
            return;
        }
        inner.sessions.insert(
            session_id,
            Session {
                timeout_ms,
                expires_at,
                closing: false,
                connection: None,
            },
        );
        inner.buckets.entry(expires_at).or_default().insert(session_id);
        debug!(session_id = %format_session_id(session_id), timeout_ms, "session tracked");
    }

    /// Pushes the deadline of a live session forward.
    ///
    /// Fails with `SessionExpired` when the session is unknown, closing, or
    /// already past its deadline.
    pub fn touch(
        &self,
        session_id: SessionId,
    ) -> Result<(), KeeperError> {
        self.touch_at(session_id, now_millis())
    }

    pub(crate) fn touch_at(
        &self,
        session_id: SessionId,
        now: u64,
    ) -> Result<(), KeeperError> {
        let mut inner = self.inner.lock();
        let session = inner.sessions.get(&session_id).ok_or(KeeperError::SessionExpired)?;
        if session.closing || session.expires_at <= now {
            return Err(KeeperError::SessionExpired);
        }
        let expires_at = self.deadline(now, session.timeout_ms);
        inner.move_to_bucket(session_id, expires_at);
        trace!(session_id, expires_at, "session touched");
        Ok(())
    }

    /// Returns sessions whose deadline has passed and marks them closing.
    /// The caller is responsible for destroying them.
    pub fn expire_check(&self) -> Vec<SessionId> {
        self.expire_check_at(now_millis())
    }

    pub(crate) fn expire_check_at(
        &self,
        now: u64,
    ) -> Vec<SessionId> {
        let mut inner = self.inner.lock();
        let due: Vec<u64> = inner.buckets.range(..=now).map(|(at, _)| *at).collect();
        let mut expired = Vec::new();
        for at in due {
            if let Some(bucket) = inner.buckets.remove(&at) {
                expired.extend(bucket);
            }
        }
        expired.sort_unstable();
        for session_id in &expired {
            if let Some(session) = inner.sessions.get_mut(session_id) {
                session.closing = true;
            }
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "sessions expired");
        }
        expired
    }

    /// Marks a session as closing so concurrent requests are rejected.
    /// Returns false if it was unknown or already closing.
    pub fn set_closing(
        &self,
        session_id: SessionId,
    ) -> bool {
        let mut inner = self.inner.lock();
        match inner.sessions.get_mut(&session_id) {
            Some(session) if !session.closing => {
                session.closing = true;
                true
            }
            _ => false,
        }
    }

    /// Puts a session whose teardown failed back on the sweep, due at the
    /// next tick. It stays closing, so requests keep being rejected.
    pub fn retry_close(
        &self,
        session_id: SessionId,
    ) -> bool {
        self.retry_close_at(session_id, now_millis())
    }

    pub(crate) fn retry_close_at(
        &self,
        session_id: SessionId,
        now: u64,
    ) -> bool {
        let expires_at = round_up_to_interval(now, self.tick_ms);
        let mut inner = self.inner.lock();
        let Some(session) = inner.sessions.get_mut(&session_id) else {
            return false;
        };
        session.closing = true;
        let previous = std::mem::replace(&mut session.expires_at, expires_at);
        remove_from_bucket(&mut inner.buckets, previous, session_id);
        inner.buckets.entry(expires_at).or_default().insert(session_id);
        debug!(session_id = %format_session_id(session_id), expires_at, "session close rescheduled");
        true
    }

    /// Stops tracking the session. Dropping its outbound sender closes the
    /// queue, which ends the connection's writer.
    pub fn remove(
        &self,
        session_id: SessionId,
    ) -> bool {
        let mut inner = self.inner.lock();
        let Some(session) = inner.sessions.remove(&session_id) else {
            return false;
        };
        remove_from_bucket(&mut inner.buckets, session.expires_at, session_id);
        debug!(session_id = %format_session_id(session_id), "session removed");
        true
    }

    /// Binds the session to a connection, replacing any previous one.
    pub fn attach(
        &self,
        session_id: SessionId,
        connection_id: ConnectionId,
        outbound: OutboundSender,
    ) -> Result<(), KeeperError> {
        let now = now_millis();
        let mut inner = self.inner.lock();
        let session = inner.sessions.get_mut(&session_id).ok_or(KeeperError::SessionExpired)?;
        if session.closing {
            return Err(KeeperError::SessionExpired);
        }
        if let Some((previous, _)) = session.connection.replace((connection_id, outbound)) {
            if previous != connection_id {
                debug!(session_id, previous, connection_id, "session moved to new connection");
            }
        }
        let expires_at = self.deadline(now, session.timeout_ms);
        inner.move_to_bucket(session_id, expires_at);
        Ok(())
    }

    /// Unbinds the connection if it still owns the session. The session
    /// itself lives on until it times out or is resumed elsewhere.
    pub fn detach(
        &self,
        session_id: SessionId,
        connection_id: ConnectionId,
    ) {
        let mut inner = self.inner.lock();
        if let Some(session) = inner.sessions.get_mut(&session_id) {
            if matches!(&session.connection, Some((owner, _)) if *owner == connection_id) {
                session.connection = None;
                trace!(session_id, connection_id, "connection detached");
            }
        }
    }

    /// Queues `message` on the session's current connection.
    pub fn send(
        &self,
        session_id: SessionId,
        message: ServerMessage,
    ) -> bool {
        let inner = self.inner.lock();
        match inner.sessions.get(&session_id).and_then(|s| s.connection.as_ref()) {
            Some((_, outbound)) => outbound.send(message).is_ok(),
            None => false,
        }
    }

    pub fn is_live(
        &self,
        session_id: SessionId,
    ) -> bool {
        self.inner.lock().sessions.get(&session_id).is_some_and(|s| !s.closing)
    }

    pub fn timeout_of(
        &self,
        session_id: SessionId,
    ) -> Option<u64> {
        self.inner.lock().sessions.get(&session_id).map(|s| s.timeout_ms)
    }

    pub fn session_count(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.inner.lock().sessions.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Sessions currently bound to a connection
    pub fn connected_count(&self) -> usize {
        self.inner.lock().sessions.values().filter(|s| s.connection.is_some()).count()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.sessions.clear();
        inner.buckets.clear();
    }

    fn deadline(
        &self,
        now: u64,
        timeout_ms: u64,
    ) -> u64 {
        round_up_to_interval(now + timeout_ms, self.tick_ms)
    }
}

impl EventSink for SessionRegistry {
    fn deliver(
        &self,
        session_id: SessionId,
        event: WatchedEvent,
    ) -> bool {
        self.send(session_id, ServerMessage::Event(event))
    }
}

/// Password a client must present to resume `session_id`.
///
/// Derived from the id so it survives restarts without being persisted.
pub fn session_password(session_id: SessionId) -> Vec<u8> {
    let mut passwd = vec![0u8; SESSION_PASSWD_LEN];
    StdRng::seed_from_u64(session_id ^ SESSION_PASSWD_SECRET).fill_bytes(&mut passwd);
    passwd
}

/// First id handed out by a registry created at `now_ms`.
///
/// The timestamp occupies the high bits so ids from different runs do not
/// collide; the low 24 bits count sessions within the run.
pub(crate) fn initial_session_id(now_ms: u64) -> SessionId {
    (now_ms << 24) >> 8
}

/// Hex rendering used in logs and status output
pub fn format_session_id(session_id: SessionId) -> String {
    format!("0x{session_id:016x}")
}
