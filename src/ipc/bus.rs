//! Publish/subscribe fan-out to IPC subscribers.
//!
//! [`EventBus::publish`] never awaits: each subscriber has a bounded queue
//! drained by its own connection task.  A full queue drops the event for
//! that subscriber only; a closed queue removes the subscriber.

use crate::ipc::protocol::{Event, EventKind};
use log::{debug, warn};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

pub type SubscriberId = u64;

/// Serialized notification line shared by every subscriber.
pub type EventLine = Arc<str>;

struct Subscriber {
    id: SubscriberId,
    /// `None` subscribes to every kind.
    kinds: Option<HashSet<EventKind>>,
    tx: mpsc::Sender<EventLine>,
}

#[derive(Default)]
pub struct EventBus {
    subscribers: Vec<Subscriber>,
    next_id: SubscriberId,
    dropped: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber queue.
    pub fn subscribe(
        &mut self,
        kinds: Option<HashSet<EventKind>>,
        tx: mpsc::Sender<EventLine>,
    ) -> SubscriberId {
        self.next_id += 1;
        let id = self.next_id;
        debug!("subscriber {} added (kinds: {:?})", id, kinds);
        self.subscribers.push(Subscriber { id, kinds, tx });
        id
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Events dropped because a subscriber queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Fan `event` out to every interested subscriber.  Returns the number
    /// of queues it was delivered to.
    pub fn publish(&mut self, event: Event) -> usize {
        if self.subscribers.is_empty() {
            return 0;
        }
        let line: EventLine = Arc::from(event.to_notification_line());
        let mut delivered = 0;
        let mut dropped = 0;
        self.subscribers.retain(|sub| {
            if sub.kinds.as_ref().is_some_and(|k| !k.contains(&event.kind)) {
                return true;
            }
            match sub.tx.try_send(Arc::clone(&line)) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    warn!("subscriber {} queue full, dropping {:?} event", sub.id, event.kind);
                    dropped += 1;
                    true
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("subscriber {} gone", sub.id);
                    false
                }
            }
        });
        self.dropped += dropped;
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn event(kind: EventKind, event_type: &str) -> Event {
        Event::new(kind, json!({ "event_type": event_type }))
    }

    fn payload(line: &str) -> Value {
        let v: Value = serde_json::from_str(line).unwrap();
        v["params"]["payload"].clone()
    }

    #[test]
    fn publish_without_subscribers_is_a_no_op() {
        let mut bus = EventBus::new();
        assert_eq!(bus.publish(event(EventKind::Project, "switched")), 0);
    }

    #[test]
    fn delivers_to_matching_subscribers() {
        let mut bus = EventBus::new();
        let (all_tx, mut all_rx) = mpsc::channel(8);
        let (ws_tx, mut ws_rx) = mpsc::channel(8);
        bus.subscribe(None, all_tx);
        bus.subscribe(Some(HashSet::from([EventKind::WorkspaceMode])), ws_tx);

        assert_eq!(bus.publish(event(EventKind::Project, "switched")), 1);
        assert_eq!(bus.publish(event(EventKind::WorkspaceMode, "enter")), 2);

        assert_eq!(payload(&all_rx.try_recv().unwrap())["event_type"], "switched");
        assert_eq!(payload(&all_rx.try_recv().unwrap())["event_type"], "enter");
        assert_eq!(payload(&ws_rx.try_recv().unwrap())["event_type"], "enter");
        assert!(ws_rx.try_recv().is_err());
    }

    #[test]
    fn full_queue_drops_without_blocking() {
        let mut bus = EventBus::new();
        let (tx, mut rx) = mpsc::channel(1);
        bus.subscribe(None, tx);
        assert_eq!(bus.publish(event(EventKind::Daemon, "a")), 1);
        assert_eq!(bus.publish(event(EventKind::Daemon, "b")), 0);
        assert_eq!(bus.dropped(), 1);
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(payload(&rx.try_recv().unwrap())["event_type"], "a");
    }

    #[test]
    fn closed_subscribers_are_pruned() {
        let mut bus = EventBus::new();
        let (tx, rx) = mpsc::channel(4);
        bus.subscribe(None, tx);
        drop(rx);
        assert_eq!(bus.publish(event(EventKind::Daemon, "a")), 0);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
