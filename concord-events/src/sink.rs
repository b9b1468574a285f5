//! Notification sinks
//!
//! Publishing is fire-and-forget: a sink never reports failure to the
//! publisher, so a slow or absent subscriber can never roll back a commit.

use crate::{Notification, Topic};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Destination for engine notifications.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

impl<T: NotificationSink + ?Sized> NotificationSink for Arc<T> {
    fn notify(&self, notification: Notification) {
        (**self).notify(notification)
    }
}

/// Shared handle to a sink, as held by engine components.
pub type SharedSink = Arc<dyn NotificationSink>;

// ============================================================================
// BROADCAST
// ============================================================================

/// Bounded tokio broadcast channel. Slow receivers lag and drop old
/// notifications; publishing never blocks.
#[derive(Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<Notification>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to every notification published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl NotificationSink for BroadcastNotifier {
    fn notify(&self, notification: Notification) {
        let topic = notification.topic.as_str();
        match self.tx.send(notification) {
            Ok(receivers) => {
                debug!(topic = topic, receivers = receivers, "Broadcast notification");
            }
            Err(_) => {
                // No receivers connected - this is fine
                debug!(topic = topic, "No receivers for notification");
            }
        }
    }
}

// ============================================================================
// IN-MEMORY
// ============================================================================

/// Records every notification in order. Used by tests and embedders that
/// poll instead of subscribing.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    log: RwLock<Vec<Notification>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded notifications, oldest first.
    pub fn notifications(&self) -> Vec<Notification> {
        match self.log.read() {
            Ok(log) => log.clone(),
            Err(_) => Vec::new(),
        }
    }

    pub fn by_topic(&self, topic: Topic) -> Vec<Notification> {
        self.notifications()
            .into_iter()
            .filter(|n| n.topic == topic)
            .collect()
    }

    pub fn count(&self, topic: Topic) -> usize {
        self.by_topic(topic).len()
    }

    pub fn clear(&self) {
        if let Ok(mut log) = self.log.write() {
            log.clear();
        }
    }
}

impl NotificationSink for MemoryNotifier {
    fn notify(&self, notification: Notification) {
        match self.log.write() {
            Ok(mut log) => log.push(notification),
            Err(_) => warn!(topic = notification.topic.as_str(), "Notification log poisoned, dropping"),
        }
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullNotifier;

impl NotificationSink for NullNotifier {
    fn notify(&self, _notification: Notification) {}
}

/// Forwards each notification to every inner sink.
#[derive(Clone, Default)]
pub struct FanoutNotifier {
    sinks: Vec<SharedSink>,
}

impl FanoutNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: SharedSink) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl NotificationSink for FanoutNotifier {
    fn notify(&self, notification: Notification) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.notify(notification.clone());
            }
            last.notify(notification);
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn note(topic: Topic) -> Notification {
        Notification::new(topic, "test", &json!({}))
    }

    #[test]
    fn test_memory_notifier_records_in_order() {
        let sink = MemoryNotifier::new();
        sink.notify(note(Topic::RoleRegistered));
        sink.notify(note(Topic::RoleUpdated));
        sink.notify(note(Topic::RoleUpdated));

        let all = sink.notifications();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].topic, Topic::RoleRegistered);
        assert_eq!(sink.count(Topic::RoleUpdated), 2);

        sink.clear();
        assert!(sink.notifications().is_empty());
    }

    #[test]
    fn test_broadcast_without_receivers_is_silent() {
        let sink = BroadcastNotifier::new(4);
        sink.notify(note(Topic::SnapshotCaptured));
        assert_eq!(sink.receiver_count(), 0);
    }

    #[tokio::test]
    async fn test_broadcast_delivers_to_subscribers() {
        let sink = BroadcastNotifier::new(8);
        let mut rx = sink.subscribe();
        sink.notify(note(Topic::TeamTransitioned));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.topic, Topic::TeamTransitioned);
    }

    #[tokio::test]
    async fn test_broadcast_lagging_receiver() {
        let sink = BroadcastNotifier::new(2);
        let mut rx = sink.subscribe();
        for _ in 0..5 {
            sink.notify(note(Topic::RoleUpdated));
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
        assert!(rx.recv().await.is_ok());
    }

    #[test]
    fn test_fanout_reaches_every_sink() {
        let a = Arc::new(MemoryNotifier::new());
        let b = Arc::new(MemoryNotifier::new());
        let fanout = FanoutNotifier::new()
            .with(a.clone())
            .with(b.clone())
            .with(Arc::new(NullNotifier));
        fanout.notify(note(Topic::SessionStarted));
        assert_eq!(a.count(Topic::SessionStarted), 1);
        assert_eq!(b.count(Topic::SessionStarted), 1);
    }
}
