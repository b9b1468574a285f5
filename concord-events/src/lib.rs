//! Concord Events - State-Change Notifications
//!
//! Every committed transition, role write, detected conflict and session event
//! is published as a [`Notification`] on a [`Topic`]. Components receive a
//! [`SharedSink`] at construction and publish without waiting on subscribers.
//!
//! # Sinks
//!
//! - `BroadcastNotifier`: bounded tokio broadcast channel for async consumers
//! - `MemoryNotifier`: ordered in-memory log
//! - `FanoutNotifier`: forwards to several sinks
//! - `NullNotifier`: discards everything

mod sink;
mod topic;

pub use sink::{
    BroadcastNotifier, FanoutNotifier, MemoryNotifier, NotificationSink, NullNotifier, SharedSink,
};
pub use topic::{Notification, Topic};

/// Publish `payload` on `topic` through `sink`.
pub fn publish(sink: &dyn NotificationSink, topic: Topic, source: &str, payload: &impl serde::Serialize) {
    sink.notify(Notification::new(topic, source, payload));
}
