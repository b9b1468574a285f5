//! Async tests for the session observer feeding sync conflicts into sessions

use concord_engine::{
    CollaborationEngine, CollaborationKind, EngineConfig, SessionEventType, SessionStatus,
    StateData, SyncRule, SyncTrigger, SyncType, TransitionContext,
};
use concord_test_utils::fixtures;

/// Register `A` and `B` linked to `session_id`, with `B` three versions
/// ahead of `A` so the next `A -> B` propagation hits a version conflict.
fn link_conflicting_roles(engine: &CollaborationEngine, session_id: &str) {
    let ctx = TransitionContext::new(session_id);
    engine.register_role("A", "READY", &ctx).unwrap();
    engine.register_role("B", "READY", &ctx).unwrap();
    for i in 0..3 {
        engine.roles().update("B", &format!("B{}", i), None, None).unwrap();
    }
    engine
        .add_sync_rule(SyncRule::new(
            "a-to-b",
            "A",
            vec!["B".to_string()],
            SyncTrigger::StateChange,
            SyncType::Immediate,
        ))
        .unwrap();
}

fn start(engine: &CollaborationEngine) -> concord_engine::CollaborationSession {
    engine
        .start_session(
            "sync review",
            vec!["A".to_string(), "B".to_string()],
            "A",
            CollaborationKind::ProblemSolving,
            fixtures::context("observer"),
            fixtures::planning_metadata(),
        )
        .unwrap()
}

#[tokio::test]
async fn test_conflict_recorded_into_linked_session() {
    let engine = CollaborationEngine::new(EngineConfig::default()).unwrap();
    let session = start(&engine);
    link_conflicting_roles(&engine, &session.id.to_string());

    let observer = engine.spawn_session_observer();
    let update = engine.update_role("A", "DONE", None, None).unwrap();
    assert_eq!(update.syncs[0].conflicts.len(), 1);

    let stats = observer.shutdown().await;
    assert_eq!(stats.events_recorded, 2);
    assert_eq!(stats.lagged, 0);

    let events = engine.sessions().events(session.id).unwrap();
    let kinds: Vec<_> = events.iter().map(|e| e.event_type).collect();
    assert_eq!(kinds, vec![SessionEventType::Conflict, SessionEventType::Resolution]);
    assert_eq!(events[0].actor, "B");
    assert_eq!(events[0].data["rule_id"], serde_json::json!("a-to-b"));

    let metrics = engine.sessions().metrics(session.id).unwrap();
    assert_eq!(metrics.conflict_count, 1);
    assert_eq!(metrics.resolution_rate, 100.0);
    assert_eq!(
        engine.sessions().session(session.id).unwrap().map(|s| s.status),
        Some(SessionStatus::Active)
    );
}

#[tokio::test]
async fn test_conflict_without_session_is_ignored() {
    let engine = CollaborationEngine::new(EngineConfig::default()).unwrap();
    let session = start(&engine);
    link_conflicting_roles(&engine, "not-a-session-id");

    let observer = engine.spawn_session_observer();
    engine.update_role("A", "DONE", None, None).unwrap();
    let stats = observer.shutdown().await;

    assert!(stats.notifications > 0);
    assert_eq!(stats.events_recorded, 0);
    assert!(engine.sessions().events(session.id).unwrap().is_empty());
}

#[tokio::test]
async fn test_closed_session_receives_no_conflicts() {
    let engine = CollaborationEngine::new(EngineConfig::default()).unwrap();
    let session = start(&engine);
    link_conflicting_roles(&engine, &session.id.to_string());
    engine
        .record_event(session.id, SessionEventType::Join, "A", StateData::new())
        .unwrap();
    engine
        .end_session(session.id, SessionStatus::Cancelled, None)
        .unwrap();

    let observer = engine.spawn_session_observer();
    engine.update_role("A", "DONE", None, None).unwrap();
    let stats = observer.shutdown().await;

    assert_eq!(stats.events_recorded, 0);
    assert_eq!(engine.sessions().events(session.id).unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_subscribers_see_team_transitions() {
    let engine = CollaborationEngine::new(EngineConfig::default()).unwrap();
    let mut rx = engine.subscribe();
    engine
        .transition("activate_team", &fixtures::context("sub"), None)
        .unwrap();

    let mut topics = Vec::new();
    while let Ok(notification) = rx.try_recv() {
        topics.push(notification.topic);
    }
    assert!(topics.contains(&concord_engine::Topic::SnapshotCaptured));
    assert!(topics.contains(&concord_engine::Topic::TeamTransitioned));
}
