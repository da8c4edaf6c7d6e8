use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// What a subscriber listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Everything committed on one resource: its reservations, payments and refunds.
    Resource(Ulid),
    Complaints,
}

/// Broadcast hub for committed engine events.
pub struct NotifyHub {
    channels: DashMap<Topic, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a topic. Creates the channel if needed.
    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(topic)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, topic: Topic, event: &Event) {
        if let Some(sender) = self.channels.get(&topic) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop channels whose last receiver has gone away.
    pub fn prune(&self) -> usize {
        let before = self.channels.len();
        self.channels.retain(|_, sender| sender.receiver_count() > 0);
        before - self.channels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::ComplaintStatus;
    use crate::model::ResourceKind;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let rid = Ulid::new();
        let mut rx = hub.subscribe(Topic::Resource(rid));

        let event = Event::ResourceRegistered {
            id: rid,
            kind: ResourceKind::Equipment,
            capacity: 4,
            name: Some("Tripod".into()),
        };
        hub.send(Topic::Resource(rid), &event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let hub = NotifyHub::new();
        let a = Ulid::new();
        let b = Ulid::new();
        let mut rx_a = hub.subscribe(Topic::Resource(a));
        let mut rx_complaints = hub.subscribe(Topic::Complaints);

        hub.send(
            Topic::Resource(b),
            &Event::ResourceUpdated { id: b, capacity: 2, name: None },
        );
        let complaint_event = Event::ComplaintTransitioned {
            id: Ulid::new(),
            to: ComplaintStatus::InProgress,
            detail: None,
            actor: None,
            at: 1,
        };
        hub.send(Topic::Complaints, &complaint_event);

        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_complaints.recv().await.unwrap(), complaint_event);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let rid = Ulid::new();
        hub.send(
            Topic::Resource(rid),
            &Event::ResourceUpdated { id: rid, capacity: 1, name: None },
        );
    }

    #[test]
    fn prune_drops_abandoned_channels() {
        let hub = NotifyHub::new();
        let kept = hub.subscribe(Topic::Complaints);
        drop(hub.subscribe(Topic::Resource(Ulid::new())));
        assert_eq!(hub.prune(), 1);
        drop(kept);
        assert_eq!(hub.prune(), 1);
    }
}
