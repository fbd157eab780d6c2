use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use tracing::trace;

use crate::ConnectionId;
use crate::OutboundSender;
use crate::ServerMessage;
use crate::SessionId;

/// Handshaken connections of one transport, by id and by session.
#[derive(Debug)]
pub(crate) struct ConnectionTable {
    next_id: AtomicU64,
    outbound: DashMap<ConnectionId, (SessionId, OutboundSender)>,
    by_session: DashMap<SessionId, ConnectionId>,
}

impl ConnectionTable {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            outbound: DashMap::new(),
            by_session: DashMap::new(),
        }
    }

    pub(crate) fn next_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn bind(
        &self,
        connection_id: ConnectionId,
        session_id: SessionId,
        outbound: OutboundSender,
    ) {
        self.outbound.insert(connection_id, (session_id, outbound));
        self.by_session.insert(session_id, connection_id);
        trace!(connection_id, session_id, "connection bound");
    }

    pub(crate) fn remove(
        &self,
        connection_id: ConnectionId,
    ) {
        if let Some((_, (session_id, _))) = self.outbound.remove(&connection_id) {
            self.by_session.remove_if(&session_id, |_, owner| *owner == connection_id);
        }
    }

    pub(crate) fn send(
        &self,
        session_id: SessionId,
        message: ServerMessage,
    ) -> bool {
        let Some(connection_id) = self.by_session.get(&session_id).map(|c| *c) else {
            return false;
        };
        match self.outbound.get(&connection_id) {
            Some(entry) => entry.1.send(message).is_ok(),
            None => false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.outbound.len()
    }

    pub(crate) fn clear(&self) {
        self.outbound.clear();
        self.by_session.clear();
    }
}
