//! Notification topics and envelopes

use concord_core::{new_entity_id, EntityId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Every topic the engine publishes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    TeamTransitioned,
    TeamTransitionFailed,
    TeamRestored,
    TeamStateTimeout,
    SnapshotCaptured,
    RoleRegistered,
    RoleUpdated,
    RoleSynced,
    ConflictDetected,
    SessionStarted,
    SessionEventRecorded,
    SessionEnded,
}

impl Topic {
    /// Dotted wire name of the topic.
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::TeamTransitioned => "team_state.transitioned",
            Topic::TeamTransitionFailed => "team_state.transition_failed",
            Topic::TeamRestored => "team_state.restored",
            Topic::TeamStateTimeout => "team_state.timeout",
            Topic::SnapshotCaptured => "snapshot.captured",
            Topic::RoleRegistered => "role_state.registered",
            Topic::RoleUpdated => "role_state.updated",
            Topic::RoleSynced => "role_state.synced",
            Topic::ConflictDetected => "role_state.conflict_detected",
            Topic::SessionStarted => "collaboration.started",
            Topic::SessionEventRecorded => "collaboration.event_recorded",
            Topic::SessionEnded => "collaboration.ended",
        }
    }

    /// All topics, in declaration order.
    pub fn all() -> &'static [Topic] {
        &[
            Topic::TeamTransitioned,
            Topic::TeamTransitionFailed,
            Topic::TeamRestored,
            Topic::TeamStateTimeout,
            Topic::SnapshotCaptured,
            Topic::RoleRegistered,
            Topic::RoleUpdated,
            Topic::RoleSynced,
            Topic::ConflictDetected,
            Topic::SessionStarted,
            Topic::SessionEventRecorded,
            Topic::SessionEnded,
        ]
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One published state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: EntityId,
    pub topic: Topic,
    /// Component that published the notification
    pub source: String,
    pub payload: JsonValue,
    pub emitted_at: Timestamp,
}

impl Notification {
    /// Build a notification, serializing `payload` to JSON.
    pub fn new(topic: Topic, source: impl Into<String>, payload: &impl Serialize) -> Self {
        let payload = serde_json::to_value(payload).unwrap_or_else(|e| {
            serde_json::json!({ "serialization_error": e.to_string() })
        });
        Self {
            id: new_entity_id(),
            topic,
            source: source.into(),
            payload,
            emitted_at: chrono::Utc::now(),
        }
    }

    /// Decode the payload into a concrete type.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Option<T> {
        serde_json::from_value(self.payload.clone()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_topic_names_unique() {
        let names: HashSet<_> = Topic::all().iter().map(Topic::as_str).collect();
        assert_eq!(names.len(), Topic::all().len());
    }

    #[test]
    fn test_notification_decode() {
        let n = Notification::new(
            Topic::RoleUpdated,
            "role_store",
            &serde_json::json!({ "actor_id": "a", "version": 2 }),
        );
        assert_eq!(n.topic.to_string(), "role_state.updated");
        let decoded: serde_json::Map<String, JsonValue> = n.decode().unwrap();
        assert_eq!(decoded["version"], 2);
    }
}
