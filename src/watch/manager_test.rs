use std::collections::HashSet;

use parking_lot::Mutex;

use super::*;
use crate::SessionId;

#[derive(Default)]
struct RecordingSink {
    closed: HashSet<SessionId>,
    events: Mutex<Vec<(SessionId, WatchedEvent)>>,
}

impl EventSink for RecordingSink {
    fn deliver(
        &self,
        session_id: SessionId,
        event: WatchedEvent,
    ) -> bool {
        if self.closed.contains(&session_id) {
            return false;
        }
        self.events.lock().push((session_id, event));
        true
    }
}


#[test]
fn test_watch_fires_exactly_once() {
    let manager = WatchManager::new();
    let sink = RecordingSink::default();
    manager.register("/foo", 1, WatchKind::Data);

    let paths = vec!["/foo".to_string()];
    assert_eq!(manager.fire(&paths, EventType::NodeDataChanged, &sink), 1);
    assert_eq!(manager.fire(&paths, EventType::NodeDataChanged, &sink), 0);

    let events = sink.events.lock();
    assert_eq!(
        *events,
        vec![(1, WatchedEvent::node(EventType::NodeDataChanged, "/foo"))]
    );
    assert_eq!(manager.watch_count(), 0);
}

#[test]
fn test_two_watches_on_same_path_deliver_two_events() {
    let manager = WatchManager::new();
    let sink = RecordingSink::default();
    manager.register("/foo", 1, WatchKind::Data);
    manager.register("/foo", 2, WatchKind::Data);
    assert_eq!(manager.watcher_count("/foo", WatchKind::Data), 2);

    let delivered = manager.fire(&["/foo".to_string()], EventType::NodeDataChanged, &sink);
    assert_eq!(delivered, 2);
    let sessions: Vec<SessionId> = sink.events.lock().iter().map(|(s, _)| *s).collect();
    assert_eq!(sessions, vec![1, 2]);
}

#[test]
fn test_paths_are_matched_exactly_not_by_prefix() {
    let manager = WatchManager::new();
    manager.register("/foo", 1, WatchKind::Data);
    manager.register("/foo/bar", 1, WatchKind::Data);

    let firing =
        manager.take_triggered(&[WatchTrigger::new("/foo/bar", EventType::NodeDataChanged)]);
    assert_eq!(firing.len(), 1);
    assert_eq!(manager.watcher_count("/foo", WatchKind::Data), 1);
}

#[test]
fn test_child_change_does_not_consume_data_watch() {
    let manager = WatchManager::new();
    manager.register("/p", 1, WatchKind::Data);
    manager.register("/p", 1, WatchKind::Child);

    let firing =
        manager.take_triggered(&[WatchTrigger::new("/p", EventType::NodeChildrenChanged)]);
    assert_eq!(firing.len(), 1);
    assert_eq!(manager.watcher_count("/p", WatchKind::Data), 1);
    assert_eq!(manager.watcher_count("/p", WatchKind::Child), 0);
}

#[test]
fn test_delete_consumes_data_and_child_watches() {
    let manager = WatchManager::new();
    manager.register("/p", 1, WatchKind::Data);
    manager.register("/p", 2, WatchKind::Child);

    let firing = manager.take_triggered(&[
        WatchTrigger::new("/p", EventType::NodeDeleted),
        WatchTrigger::new("/", EventType::NodeChildrenChanged),
    ]);
    assert_eq!(
        firing.events,
        vec![
            (1, WatchedEvent::node(EventType::NodeDeleted, "/p")),
            (2, WatchedEvent::node(EventType::NodeDeleted, "/p")),
        ]
    );
    assert_eq!(manager.watch_count(), 0);
}

#[test]
fn test_registration_after_take_waits_for_next_mutation() {
    let manager = WatchManager::new();
    manager.register("/foo", 1, WatchKind::Data);

    let firing = manager.take_triggered(&[WatchTrigger::new("/foo", EventType::NodeDataChanged)]);
    // A read served between take and delivery registers for the next change
    manager.register("/foo", 1, WatchKind::Data);
    assert_eq!(firing.len(), 1);
    assert_eq!(manager.watcher_count("/foo", WatchKind::Data), 1);
}

#[test]
fn test_remove_session_drops_only_its_watches() {
    let manager = WatchManager::new();
    manager.register("/a", 1, WatchKind::Data);
    manager.register("/a", 2, WatchKind::Data);
    manager.register("/b", 1, WatchKind::Child);

    assert_eq!(manager.remove_session(1), 2);
    assert_eq!(manager.watch_count(), 1);
    assert_eq!(manager.watched_path_count(), 1);
    assert_eq!(manager.remove_session(1), 0);
}

#[test]
fn test_events_for_closed_sessions_are_dropped_silently() {
    let manager = WatchManager::new();
    let sink = RecordingSink {
        closed: HashSet::from([7]),
        ..Default::default()
    };
    manager.register("/a", 7, WatchKind::Data);
    manager.register("/a", 8, WatchKind::Data);

    assert_eq!(manager.fire(&["/a".to_string()], EventType::NodeDeleted, &sink), 1);
    assert_eq!(manager.watch_count(), 0);
}
