use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use tracing::debug;
use tracing::trace;

use super::EventType;
use super::WatchKind;
use super::WatchTrigger;
use super::WatchedEvent;
use crate::SessionId;

/// Destination of fired watch events, implemented by the session registry.
pub trait EventSink: Send + Sync {
    /// Queues `event` for `session_id`; returns false when the session is gone.
    fn deliver(
        &self,
        session_id: SessionId,
        event: WatchedEvent,
    ) -> bool;
}

/// Events taken out of the registry by a single mutation, in trigger order
#[derive(Debug, Default, PartialEq, Eq)]
pub struct WatchFiring {
    pub events: Vec<(SessionId, WatchedEvent)>,
}

impl WatchFiring {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn extend(
        &mut self,
        other: WatchFiring,
    ) {
        self.events.extend(other.events);
    }
}

/// Registry of pending single-shot watches, keyed by exact path.
///
/// Each successful registration is one watch and yields one event. Data and
/// child watches are kept apart so a child list change never consumes a data
/// watch on the same node.
#[derive(Debug, Default)]
pub struct WatchManager {
    data_watches: DashMap<String, Vec<SessionId>>,
    child_watches: DashMap<String, Vec<SessionId>>,
    /// Total registrations across both registries
    count: AtomicUsize,
}

impl WatchManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        path: &str,
        session_id: SessionId,
        kind: WatchKind,
    ) {
        self.registry(kind).entry(path.to_string()).or_default().push(session_id);
        self.count.fetch_add(1, Ordering::Relaxed);
        trace!(%path, session_id, ?kind, "watch registered");
    }

    /// Removes every watch affected by `triggers` and returns the events to
    /// deliver.
    ///
    /// Must be called inside the same exclusive section as the mutation that
    /// produced the triggers, so a concurrent read cannot register a watch that
    /// this mutation would then consume.
    pub fn take_triggered(
        &self,
        triggers: &[WatchTrigger],
    ) -> WatchFiring {
        let mut firing = WatchFiring::default();
        for trigger in triggers {
            for kind in kinds_for(trigger.event_type) {
                if let Some((_, sessions)) = self.registry(*kind).remove(&trigger.path) {
                    self.count.fetch_sub(sessions.len(), Ordering::Relaxed);
                    firing.events.extend(
                        sessions
                            .into_iter()
                            .map(|s| (s, WatchedEvent::node(trigger.event_type, &trigger.path))),
                    );
                }
            }
        }
        firing
    }

    /// Delivers previously taken events, in order. Returns how many reached a
    /// live session; events for destroyed sessions are dropped silently.
    pub fn deliver(
        &self,
        firing: WatchFiring,
        sink: &dyn EventSink,
    ) -> usize {
        let mut delivered = 0;
        for (session_id, event) in firing.events {
            if sink.deliver(session_id, event) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Takes and delivers in one step: fires every watch on `paths` for
    /// `event_type`.
    pub fn fire(
        &self,
        paths: &[String],
        event_type: EventType,
        sink: &dyn EventSink,
    ) -> usize {
        let triggers: Vec<WatchTrigger> =
            paths.iter().map(|p| WatchTrigger::new(p, event_type)).collect();
        let firing = self.take_triggered(&triggers);
        self.deliver(firing, sink)
    }

    /// Drops every watch owned by `session_id`
    pub fn remove_session(
        &self,
        session_id: SessionId,
    ) -> usize {
        let mut removed = 0;
        for registry in [&self.data_watches, &self.child_watches] {
            registry.retain(|_, sessions| {
                let before = sessions.len();
                sessions.retain(|s| *s != session_id);
                removed += before - sessions.len();
                !sessions.is_empty()
            });
        }
        self.count.fetch_sub(removed, Ordering::Relaxed);
        if removed > 0 {
            debug!(session_id, removed, "dropped watches of closed session");
        }
        removed
    }

    /// Total pending watches
    pub fn watch_count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    /// Pending watches on `path` of the given kind
    pub fn watcher_count(
        &self,
        path: &str,
        kind: WatchKind,
    ) -> usize {
        self.registry(kind).get(path).map(|w| w.len()).unwrap_or(0)
    }

    /// Distinct paths with at least one pending watch
    pub fn watched_path_count(&self) -> usize {
        self.data_watches.len() + self.child_watches.len()
    }

    pub fn clear(&self) {
        self.data_watches.clear();
        self.child_watches.clear();
        self.count.store(0, Ordering::Relaxed);
    }

    fn registry(
        &self,
        kind: WatchKind,
    ) -> &DashMap<String, Vec<SessionId>> {
        match kind {
            WatchKind::Data => &self.data_watches,
            WatchKind::Child => &self.child_watches,
        }
    }
}

fn kinds_for(event_type: EventType) -> &'static [WatchKind] {
    match event_type {
        EventType::NodeCreated | EventType::NodeDataChanged => &[WatchKind::Data],
        EventType::NodeDeleted => &[WatchKind::Data, WatchKind::Child],
        EventType::NodeChildrenChanged => &[WatchKind::Child],
        EventType::None => &[],
    }
}
