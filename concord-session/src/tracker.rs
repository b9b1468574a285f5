//! Session lifecycle and event log

use chrono::Utc;
use concord_core::{
    ActorId, CollaborationEvent, CollaborationKind, CollaborationPattern, CollaborationSession,
    ConcordError, ConcordResult, ConflictNotice, EntityId, SessionError, SessionEventType,
    SessionMetadata, SessionMetrics, SessionStatus, StateData, StorageError, TransitionContext,
};
use concord_events::{publish, Notification, SharedSink, Topic};
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

const SOURCE: &str = "collaboration_session_tracker";

#[derive(Debug, Clone, Serialize)]
struct SessionNotice<'a> {
    session_id: EntityId,
    session: &'a CollaborationSession,
}

#[derive(Debug, Clone, Serialize)]
struct EventNotice<'a> {
    event: &'a CollaborationEvent,
    session_status: SessionStatus,
}

#[derive(Debug, Default)]
pub(crate) struct TrackerState {
    pub(crate) sessions: HashMap<EntityId, CollaborationSession>,
    pub(crate) events: HashMap<EntityId, Vec<CollaborationEvent>>,
    /// Ended session ids, in the order they ended
    pub(crate) ended: Vec<EntityId>,
    pub(crate) patterns: BTreeMap<String, CollaborationPattern>,
}

impl TrackerState {
    pub(crate) fn ended_sessions(&self) -> impl Iterator<Item = &CollaborationSession> {
        self.ended.iter().filter_map(|id| self.sessions.get(id))
    }
}

/// Records collaboration sessions and derives process metrics from them.
///
/// The tracker depends on no other component. It learns about sync
/// conflicts only through [`CollaborationSessionTracker::observe`].
pub struct CollaborationSessionTracker {
    state: RwLock<TrackerState>,
    sink: SharedSink,
}

impl CollaborationSessionTracker {
    pub fn new(sink: SharedSink) -> Self {
        Self {
            state: RwLock::new(TrackerState::default()),
            sink,
        }
    }

    /// Open a session in the `initiated` status.
    pub fn start_session(
        &self,
        name: impl Into<String>,
        participants: Vec<ActorId>,
        initiator: impl Into<ActorId>,
        kind: CollaborationKind,
        context: TransitionContext,
        metadata: SessionMetadata,
    ) -> ConcordResult<CollaborationSession> {
        let name = name.into();
        if participants.is_empty() {
            return Err(SessionError::EmptyParticipants { name }.into());
        }

        let session = CollaborationSession {
            id: concord_core::new_entity_id(),
            name,
            participants,
            initiator: initiator.into(),
            kind,
            status: SessionStatus::Initiated,
            start_time: Utc::now(),
            end_time: None,
            context,
            metadata,
            outcome: None,
        };

        {
            let mut state = self.write()?;
            state.sessions.insert(session.id, session.clone());
            state.events.insert(session.id, Vec::new());
        }

        info!(
            session_id = %session.id,
            name = %session.name,
            participants = session.participants.len(),
            kind = ?session.kind,
            initiator = %session.initiator,
            "Collaboration session started"
        );
        publish(
            self.sink.as_ref(),
            Topic::SessionStarted,
            SOURCE,
            &SessionNotice {
                session_id: session.id,
                session: &session,
            },
        );
        Ok(session)
    }

    /// Close a session with a terminal status and optional outcome, then fold
    /// it into the collaboration patterns.
    pub fn end_session(
        &self,
        session_id: EntityId,
        status: SessionStatus,
        outcome: Option<StateData>,
    ) -> ConcordResult<CollaborationSession> {
        if !status.is_terminal() {
            return Err(SessionError::InvalidTerminalStatus {
                session_id,
                status: status.as_str().to_string(),
            }
            .into());
        }

        let session = {
            let mut state = self.write()?;
            let current = state
                .sessions
                .get(&session_id)
                .map(|s| s.status)
                .ok_or(SessionError::UnknownSession { session_id })?;
            if current.is_terminal() {
                return Err(SessionError::SessionClosed {
                    session_id,
                    status: current.as_str().to_string(),
                }
                .into());
            }

            // never before the last recorded event
            let last_event = state
                .events
                .get(&session_id)
                .and_then(|events| events.last())
                .map(|e| e.timestamp);
            let session = state
                .sessions
                .get_mut(&session_id)
                .ok_or(SessionError::UnknownSession { session_id })?;
            let now = Utc::now();
            session.end_time = Some(last_event.map_or(now, |last| last.max(now)));
            session.status = status;
            session.outcome = outcome;
            let session = session.clone();

            state.ended.push(session_id);
            crate::analytics::fold_pattern(&mut state.patterns, &session);
            session
        };

        info!(
            session_id = %session_id,
            status = session.status.as_str(),
            duration_ms = session.duration(Utc::now()).num_milliseconds(),
            participants = session.participants.len(),
            "Collaboration session ended"
        );
        publish(
            self.sink.as_ref(),
            Topic::SessionEnded,
            SOURCE,
            &SessionNotice {
                session_id,
                session: &session,
            },
        );
        Ok(session)
    }

    /// Append an event to an open session.
    ///
    /// Event timestamps never go backwards within a session. The first event
    /// moves an initiated session to active.
    pub fn record_event(
        &self,
        session_id: EntityId,
        event_type: SessionEventType,
        actor: impl Into<ActorId>,
        data: StateData,
    ) -> ConcordResult<CollaborationEvent> {
        let (event, status) = {
            let mut state = self.write()?;
            let session = state
                .sessions
                .get_mut(&session_id)
                .ok_or(SessionError::UnknownSession { session_id })?;
            if session.status.is_terminal() {
                return Err(SessionError::SessionClosed {
                    session_id,
                    status: session.status.as_str().to_string(),
                }
                .into());
            }
            if session.status == SessionStatus::Initiated {
                session.status = SessionStatus::Active;
            }
            let status = session.status;

            let events = state.events.entry(session_id).or_default();
            let now = Utc::now();
            let timestamp = events.last().map_or(now, |last| last.timestamp.max(now));
            let event = CollaborationEvent {
                id: concord_core::new_entity_id(),
                session_id,
                timestamp,
                event_type,
                actor: actor.into(),
                data,
                impact: event_type.impact(),
            };
            events.push(event.clone());
            (event, status)
        };

        debug!(
            session_id = %session_id,
            event_type = ?event.event_type,
            actor = %event.actor,
            "Collaboration event recorded"
        );
        publish(
            self.sink.as_ref(),
            Topic::SessionEventRecorded,
            SOURCE,
            &EventNotice {
                event: &event,
                session_status: status,
            },
        );
        Ok(event)
    }

    /// React to a notification from another component.
    ///
    /// Conflict notices whose target names an open session become a
    /// `conflict` event, followed by a `resolution` event when the conflict
    /// was resolved. Everything else is ignored.
    pub fn observe(&self, notification: &Notification) -> ConcordResult<Vec<CollaborationEvent>> {
        if notification.topic != Topic::ConflictDetected {
            return Ok(Vec::new());
        }
        let Some(notice) = notification.decode::<ConflictNotice>() else {
            warn!(notification_id = %notification.id, "Undecodable conflict notification");
            return Ok(Vec::new());
        };
        let Some(session_id) = notice
            .session_id
            .as_deref()
            .and_then(|s| Uuid::parse_str(s).ok())
        else {
            return Ok(Vec::new());
        };
        match self.session(session_id)? {
            Some(session) if !session.status.is_terminal() => {}
            _ => return Ok(Vec::new()),
        }

        let mut data = StateData::new();
        data.insert("rule_id".to_string(), json!(notice.rule_id));
        data.insert("source_actor".to_string(), json!(notice.source_actor));
        data.insert("conflict_type".to_string(), json!(notice.conflict.conflict_type));
        data.insert("description".to_string(), json!(notice.conflict.description));

        let mut recorded = vec![self.record_event(
            session_id,
            SessionEventType::Conflict,
            notice.target_actor.clone(),
            data,
        )?];
        if notice.resolved {
            let mut data = StateData::new();
            data.insert("resolution".to_string(), json!(notice.conflict.resolution));
            recorded.push(self.record_event(
                session_id,
                SessionEventType::Resolution,
                notice.target_actor,
                data,
            )?);
        }
        Ok(recorded)
    }

    pub fn session(&self, session_id: EntityId) -> ConcordResult<Option<CollaborationSession>> {
        Ok(self.read()?.sessions.get(&session_id).cloned())
    }

    /// Sessions not yet ended, oldest first.
    pub fn active_sessions(&self) -> ConcordResult<Vec<CollaborationSession>> {
        let state = self.read()?;
        let mut active: Vec<_> = state
            .sessions
            .values()
            .filter(|s| !s.status.is_terminal())
            .cloned()
            .collect();
        active.sort_by_key(|s| s.start_time);
        Ok(active)
    }

    /// Events of a session in recorded order.
    pub fn events(&self, session_id: EntityId) -> ConcordResult<Vec<CollaborationEvent>> {
        let state = self.read()?;
        state
            .events
            .get(&session_id)
            .cloned()
            .ok_or_else(|| SessionError::UnknownSession { session_id }.into())
    }

    /// Mean impacts, conflict count and resolution rate of a session.
    pub fn metrics(&self, session_id: EntityId) -> ConcordResult<SessionMetrics> {
        let state = self.read()?;
        let session = state
            .sessions
            .get(&session_id)
            .ok_or(SessionError::UnknownSession { session_id })?;
        let events = state.events.get(&session_id).map(Vec::as_slice).unwrap_or_default();

        let mean = |f: fn(&CollaborationEvent) -> i32| {
            if events.is_empty() {
                0.0
            } else {
                events.iter().map(|e| f(e) as f64).sum::<f64>() / events.len() as f64
            }
        };
        let count = |kind: SessionEventType| events.iter().filter(|e| e.event_type == kind).count();
        let conflicts = count(SessionEventType::Conflict);
        let resolutions = count(SessionEventType::Resolution);

        Ok(SessionMetrics {
            session_id,
            duration_ms: session.duration(Utc::now()).num_milliseconds(),
            participant_count: session.participants.len(),
            event_count: events.len(),
            average_productivity: mean(|e| e.impact.productivity),
            average_quality: mean(|e| e.impact.quality),
            average_engagement: mean(|e| e.impact.engagement),
            consensus_level: mean(|e| e.impact.consensus),
            conflict_count: conflicts,
            resolution_rate: if conflicts == 0 {
                100.0
            } else {
                resolutions as f64 / conflicts as f64 * 100.0
            },
        })
    }

    pub(crate) fn read(&self) -> ConcordResult<RwLockReadGuard<'_, TrackerState>> {
        self.state
            .read()
            .map_err(|_| ConcordError::Storage(StorageError::LockPoisoned))
    }

    fn write(&self) -> ConcordResult<RwLockWriteGuard<'_, TrackerState>> {
        self.state
            .write()
            .map_err(|_| ConcordError::Storage(StorageError::LockPoisoned))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use concord_core::{Conflict, ConflictType, ResolutionStrategy};
    use concord_events::MemoryNotifier;
    use std::sync::Arc;

    fn tracker() -> (CollaborationSessionTracker, Arc<MemoryNotifier>) {
        let sink = Arc::new(MemoryNotifier::new());
        (CollaborationSessionTracker::new(sink.clone()), sink)
    }

    fn start(tracker: &CollaborationSessionTracker, participants: &[&str]) -> CollaborationSession {
        tracker
            .start_session(
                "design review",
                participants.iter().map(|p| p.to_string()).collect(),
                participants[0],
                CollaborationKind::CodeReview,
                TransitionContext::new("s-1"),
                SessionMetadata::default(),
            )
            .unwrap()
    }

    fn conflict_notice(session_id: Option<String>, resolved: bool) -> Notification {
        let notice = ConflictNotice {
            rule_id: Some("r1".to_string()),
            source_actor: "architect".to_string(),
            target_actor: "developer".to_string(),
            session_id,
            conflict: Conflict {
                actor_id: "developer".to_string(),
                conflict_type: ConflictType::State,
                description: "State conflict".to_string(),
                resolution: ResolutionStrategy::Merge,
                resolved_value: None,
            },
            resolved,
        };
        Notification::new(Topic::ConflictDetected, "sync_rule_engine", &notice)
    }

    #[test]
    fn test_start_requires_participants() {
        let (tracker, _) = tracker();
        let err = tracker
            .start_session(
                "empty",
                Vec::new(),
                "pm",
                CollaborationKind::Planning,
                TransitionContext::default(),
                SessionMetadata::default(),
            )
            .unwrap_err();
        assert_eq!(
            err,
            ConcordError::Session(SessionError::EmptyParticipants {
                name: "empty".to_string()
            })
        );
    }

    #[test]
    fn test_lifecycle() {
        let (tracker, sink) = tracker();
        let session = start(&tracker, &["architect", "developer"]);
        assert_eq!(session.status, SessionStatus::Initiated);
        assert_eq!(tracker.active_sessions().unwrap().len(), 1);

        tracker
            .record_event(session.id, SessionEventType::Join, "developer", StateData::new())
            .unwrap();
        assert_eq!(tracker.session(session.id).unwrap().unwrap().status, SessionStatus::Active);

        let mut outcome = StateData::new();
        outcome.insert("approved".to_string(), json!(true));
        let ended = tracker
            .end_session(session.id, SessionStatus::Completed, Some(outcome.clone()))
            .unwrap();
        assert_eq!(ended.status, SessionStatus::Completed);
        assert_eq!(ended.outcome, Some(outcome));
        assert!(ended.end_time.is_some());
        assert!(tracker.active_sessions().unwrap().is_empty());

        assert_eq!(sink.count(Topic::SessionStarted), 1);
        assert_eq!(sink.count(Topic::SessionEventRecorded), 1);
        assert_eq!(sink.count(Topic::SessionEnded), 1);
    }

    #[test]
    fn test_closed_session_rejects_events_and_second_end() {
        let (tracker, _) = tracker();
        let session = start(&tracker, &["a"]);
        tracker.end_session(session.id, SessionStatus::Cancelled, None).unwrap();

        let err = tracker
            .record_event(session.id, SessionEventType::Contribute, "a", StateData::new())
            .unwrap_err();
        assert_eq!(
            err,
            ConcordError::Session(SessionError::SessionClosed {
                session_id: session.id,
                status: "cancelled".to_string()
            })
        );
        assert!(tracker.end_session(session.id, SessionStatus::Completed, None).is_err());
    }

    #[test]
    fn test_end_requires_terminal_status() {
        let (tracker, _) = tracker();
        let session = start(&tracker, &["a"]);
        let err = tracker.end_session(session.id, SessionStatus::Active, None).unwrap_err();
        assert!(matches!(
            err,
            ConcordError::Session(SessionError::InvalidTerminalStatus { .. })
        ));
    }

    #[test]
    fn test_unknown_session() {
        let (tracker, _) = tracker();
        let id = concord_core::new_entity_id();
        assert_eq!(
            tracker.metrics(id).unwrap_err(),
            ConcordError::Session(SessionError::UnknownSession { session_id: id })
        );
        assert!(tracker
            .record_event(id, SessionEventType::Join, "a", StateData::new())
            .is_err());
    }

    #[test]
    fn test_metrics() {
        let (tracker, _) = tracker();
        let session = start(&tracker, &["a", "b", "c"]);
        for kind in [
            SessionEventType::Join,
            SessionEventType::Conflict,
            SessionEventType::Conflict,
            SessionEventType::Resolution,
        ] {
            tracker.record_event(session.id, kind, "a", StateData::new()).unwrap();
        }

        let metrics = tracker.metrics(session.id).unwrap();
        assert_eq!(metrics.event_count, 4);
        assert_eq!(metrics.participant_count, 3);
        assert_eq!(metrics.conflict_count, 2);
        assert_eq!(metrics.resolution_rate, 50.0);
        // (10 - 20 - 20 + 25) / 4
        assert_eq!(metrics.average_productivity, -1.25);
        // (0 - 30 - 30 + 40) / 4
        assert_eq!(metrics.consensus_level, -5.0);
    }

    #[test]
    fn test_metrics_without_events() {
        let (tracker, _) = tracker();
        let session = start(&tracker, &["a"]);
        let metrics = tracker.metrics(session.id).unwrap();
        assert_eq!(metrics.event_count, 0);
        assert_eq!(metrics.average_quality, 0.0);
        assert_eq!(metrics.resolution_rate, 100.0);
    }

    #[test]
    fn test_event_timestamps_monotonic() {
        let (tracker, _) = tracker();
        let session = start(&tracker, &["a"]);
        for _ in 0..50 {
            tracker
                .record_event(session.id, SessionEventType::Contribute, "a", StateData::new())
                .unwrap();
        }
        let events = tracker.events(session.id).unwrap();
        assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_observe_resolved_conflict() {
        let (tracker, _) = tracker();
        let session = start(&tracker, &["architect", "developer"]);
        let recorded = tracker
            .observe(&conflict_notice(Some(session.id.to_string()), true))
            .unwrap();

        let kinds: Vec<_> = recorded.iter().map(|e| e.event_type).collect();
        assert_eq!(kinds, vec![SessionEventType::Conflict, SessionEventType::Resolution]);
        assert_eq!(recorded[0].actor, "developer");
        assert_eq!(recorded[0].data["rule_id"], json!("r1"));
        assert_eq!(tracker.metrics(session.id).unwrap().resolution_rate, 100.0);
    }

    #[test]
    fn test_observe_unresolved_conflict() {
        let (tracker, _) = tracker();
        let session = start(&tracker, &["architect", "developer"]);
        let recorded = tracker
            .observe(&conflict_notice(Some(session.id.to_string()), false))
            .unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(tracker.metrics(session.id).unwrap().resolution_rate, 0.0);
    }

    #[test]
    fn test_observe_ignores_unrelated() {
        let (tracker, _) = tracker();
        let session = start(&tracker, &["a"]);

        assert!(tracker.observe(&conflict_notice(None, true)).unwrap().is_empty());
        assert!(tracker
            .observe(&conflict_notice(Some("not-a-session".to_string()), true))
            .unwrap()
            .is_empty());
        let other = Notification::new(Topic::RoleUpdated, "role_state_store", &json!({}));
        assert!(tracker.observe(&other).unwrap().is_empty());

        tracker.end_session(session.id, SessionStatus::Completed, None).unwrap();
        assert!(tracker
            .observe(&conflict_notice(Some(session.id.to_string()), true))
            .unwrap()
            .is_empty());
    }
}
