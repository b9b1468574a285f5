//! Concord Test Utilities
//!
//! Shared test infrastructure for the Concord workspace:
//! - Proptest generators for the core data types
//! - Fixtures wiring components to an in-memory notifier
//! - Assertions for Concord-specific error variants

pub use concord_core::*;
pub use concord_events::MemoryNotifier;

use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Concord data types.

    use super::*;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;
    use serde_json::json;
    use uuid::Uuid;

    /// Generate a valid UUIDv7 (timestamp-sortable).
    pub fn arb_entity_id() -> impl Strategy<Value = EntityId> {
        Just(()).prop_map(|_| Uuid::now_v7())
    }

    /// Generate a timestamp between 2020 and 2030.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1_577_836_800i64..1_893_456_000i64)
            .prop_map(|secs| Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now))
    }

    pub fn arb_actor_id() -> impl Strategy<Value = ActorId> {
        "[a-z][a-z0-9_]{0,11}"
    }

    /// Generate a small flat payload of string, integer and bool values.
    pub fn arb_state_data() -> impl Strategy<Value = StateData> {
        prop::collection::btree_map(
            "[a-z]{1,6}",
            prop_oneof![
                "[a-z ]{0,12}".prop_map(|s| json!(s)),
                any::<i32>().prop_map(|n| json!(n)),
                any::<bool>().prop_map(|b| json!(b)),
            ],
            0..5,
        )
        .prop_map(|m| m.into_iter().collect())
    }

    pub fn arb_state_category() -> impl Strategy<Value = StateCategory> {
        prop_oneof![
            Just(StateCategory::Operational),
            Just(StateCategory::Collaborative),
            Just(StateCategory::Transitional),
        ]
    }

    /// One of the default team state ids.
    pub fn arb_team_state_id() -> impl Strategy<Value = StateId> {
        prop::sample::select(
            default_team_states()
                .into_iter()
                .map(|d| d.id)
                .collect::<Vec<_>>(),
        )
    }

    pub fn arb_team_state() -> impl Strategy<Value = TeamState> {
        (
            arb_team_state_id(),
            prop::collection::vec(arb_actor_id(), 0..5),
            0u8..=100,
            arb_timestamp(),
            arb_state_data(),
        )
            .prop_map(|(mode, actors, progress, entered_at, metadata)| TeamState {
                id: new_entity_id(),
                collaboration_mode: mode,
                active_actors: actors,
                progress,
                entered_at,
                metadata,
            })
    }

    pub fn arb_role_state() -> impl Strategy<Value = RoleState> {
        (
            arb_actor_id(),
            "[A-Z]{2,8}",
            proptest::option::of("[A-Z]{2,8}"),
            arb_state_data(),
            1u64..1000,
            arb_timestamp(),
            0u32..10,
        )
            .prop_map(|(actor_id, current, previous, data, version, updated, workload)| RoleState {
                actor_id,
                current_state: current,
                previous_state: previous,
                state_data: data,
                version,
                last_updated: updated,
                metadata: RoleMetadata {
                    workload,
                    ..RoleMetadata::default()
                },
            })
    }

    pub fn arb_sync_trigger() -> impl Strategy<Value = SyncTrigger> {
        prop_oneof![
            Just(SyncTrigger::StateChange),
            Just(SyncTrigger::DataUpdate),
            Just(SyncTrigger::CapabilityChange),
            Just(SyncTrigger::WorkloadChange),
            Just(SyncTrigger::Manual),
        ]
    }

    /// Sync types that never require a condition.
    pub fn arb_unconditional_sync_type() -> impl Strategy<Value = SyncType> {
        prop_oneof![
            Just(SyncType::Immediate),
            Just(SyncType::Batched),
            Just(SyncType::Scheduled),
        ]
    }

    /// Generate a rule that passes validation.
    pub fn arb_sync_rule() -> impl Strategy<Value = SyncRule> {
        (
            "r[0-9]{1,4}",
            arb_actor_id(),
            prop::collection::vec(arb_actor_id(), 1..4),
            arb_sync_trigger(),
            arb_unconditional_sync_type(),
            -5i32..5,
        )
            .prop_map(|(id, source, targets, trigger, sync_type, priority)| {
                SyncRule::new(id, source, targets, trigger, sync_type).with_priority(priority)
            })
    }

    pub fn arb_session_event_type() -> impl Strategy<Value = SessionEventType> {
        prop_oneof![
            Just(SessionEventType::Join),
            Just(SessionEventType::Leave),
            Just(SessionEventType::Contribute),
            Just(SessionEventType::Question),
            Just(SessionEventType::Decision),
            Just(SessionEventType::Conflict),
            Just(SessionEventType::Resolution),
        ]
    }

    pub fn arb_collaboration_kind() -> impl Strategy<Value = CollaborationKind> {
        prop_oneof![
            Just(CollaborationKind::Brainstorming),
            Just(CollaborationKind::ProblemSolving),
            Just(CollaborationKind::DecisionMaking),
            Just(CollaborationKind::KnowledgeSharing),
            Just(CollaborationKind::CodeReview),
            Just(CollaborationKind::Planning),
        ]
    }

    /// Generate a config that passes validation.
    pub fn arb_valid_config() -> impl Strategy<Value = EngineConfig> {
        (
            MIN_SNAPSHOT_CAPACITY..500usize,
            1usize..=10,
            1usize..50,
            1usize..16,
            1u64..86_400,
            1usize..4096,
            0.0f64..=100.0,
        )
            .prop_map(|(capacity, batch, sync_batch, hops, window, notify, confidence)| EngineConfig {
                snapshot_capacity: capacity,
                snapshot_eviction_batch: batch,
                sync_batch_size: sync_batch,
                max_propagation_hops: hops,
                recent_conflict_window: Duration::from_secs(window),
                notification_capacity: notify,
                default_action_confidence: confidence,
            })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built components and scenarios.

    use super::*;
    use concord_events::SharedSink;
    use concord_fsm::TeamStateMachine;
    use concord_roles::{RoleStateStore, SyncRuleEngine, SyncSettings};
    use concord_session::CollaborationSessionTracker;
    use concord_snapshot::SnapshotManager;

    /// Small but valid config for tests.
    pub fn minimal_config() -> EngineConfig {
        EngineConfig {
            snapshot_capacity: MIN_SNAPSHOT_CAPACITY,
            snapshot_eviction_batch: 2,
            sync_batch_size: 5,
            max_propagation_hops: 4,
            recent_conflict_window: Duration::from_secs(60),
            notification_capacity: 64,
            default_action_confidence: 80.0,
        }
    }

    pub fn memory_sink() -> Arc<MemoryNotifier> {
        Arc::new(MemoryNotifier::new())
    }

    pub fn context(session_id: &str) -> TransitionContext {
        TransitionContext::new(session_id).with_team("team-1")
    }

    /// Default-graph machine publishing to `sink`.
    pub fn team_machine(sink: Arc<MemoryNotifier>) -> TeamStateMachine {
        let shared: SharedSink = sink;
        let snapshots = Arc::new(SnapshotManager::new(100, 10, shared.clone()));
        match TeamStateMachine::with_default_states(snapshots, shared) {
            Ok(machine) => machine,
            Err(e) => panic!("default states failed to register: {e}"),
        }
    }

    /// Store and sync engine sharing `sink`.
    pub fn sync_engine(sink: Arc<MemoryNotifier>) -> SyncRuleEngine {
        let shared: SharedSink = sink;
        let store = Arc::new(RoleStateStore::new(shared.clone()));
        SyncRuleEngine::new(store, shared, SyncSettings::default())
    }

    /// Actors `a` (READY) and `b` (READY) with an immediate a -> b
    /// `state_change` rule.
    pub fn two_actor_sync(sink: Arc<MemoryNotifier>) -> SyncRuleEngine {
        let engine = sync_engine(sink);
        let ctx = context("s-1");
        for actor in ["a", "b"] {
            if let Err(e) = engine.store().register(actor, "READY", &ctx) {
                panic!("register {actor}: {e}");
            }
        }
        let rule = SyncRule::new(
            "a_to_b",
            "a",
            vec!["b".to_string()],
            SyncTrigger::StateChange,
            SyncType::Immediate,
        );
        if let Err(e) = engine.add_rule(rule) {
            panic!("add rule: {e}");
        }
        engine
    }

    pub fn session_tracker(sink: Arc<MemoryNotifier>) -> CollaborationSessionTracker {
        CollaborationSessionTracker::new(sink)
    }

    /// A planning session metadata with a one-hour budget.
    pub fn planning_metadata() -> SessionMetadata {
        SessionMetadata {
            objective: "Plan the release".to_string(),
            expected_duration: Some(Duration::from_secs(3600)),
            priority: 5,
            tags: vec!["planning".to_string()],
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for Concord-specific error variants.

    use super::*;

    /// Assert that a ConcordResult is Ok.
    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &ConcordResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert that a ConcordResult is Err.
    #[track_caller]
    pub fn assert_err<T: std::fmt::Debug>(result: &ConcordResult<T>) {
        assert!(result.is_err(), "Expected Err, got Ok: {:?}", result);
    }

    #[track_caller]
    pub fn assert_illegal_transition<T: std::fmt::Debug>(result: &ConcordResult<T>, trigger: &str) {
        match result {
            Err(ConcordError::Transition(TransitionError::IllegalTransition { trigger: t, .. })) => {
                assert_eq!(t, trigger, "Wrong trigger in IllegalTransition");
            }
            other => panic!("Expected IllegalTransition for '{}', got: {:?}", trigger, other),
        }
    }

    #[track_caller]
    pub fn assert_conditions_not_met<T: std::fmt::Debug>(result: &ConcordResult<T>) {
        match result {
            Err(ConcordError::Transition(TransitionError::ConditionsNotMet { .. })) => {}
            other => panic!("Expected ConditionsNotMet, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_unknown_actor<T: std::fmt::Debug>(result: &ConcordResult<T>, actor_id: &str) {
        match result {
            Err(ConcordError::Role(RoleError::UnknownActor { actor_id: a, .. })) => {
                assert_eq!(a, actor_id, "Wrong actor in UnknownActor");
            }
            other => panic!("Expected UnknownActor for '{}', got: {:?}", actor_id, other),
        }
    }

    #[track_caller]
    pub fn assert_duplicate_actor<T: std::fmt::Debug>(result: &ConcordResult<T>) {
        match result {
            Err(ConcordError::Role(RoleError::DuplicateActor { .. })) => {}
            other => panic!("Expected DuplicateActor, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_corrupt_snapshot<T: std::fmt::Debug>(result: &ConcordResult<T>) {
        match result {
            Err(ConcordError::Snapshot(SnapshotError::CorruptSnapshot { .. })) => {}
            other => panic!("Expected CorruptSnapshot, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &ConcordResult<T>) {
        match result {
            Err(ConcordError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    /// Assert that a config passes validation.
    #[track_caller]
    pub fn assert_config_valid(config: &EngineConfig) {
        if let Err(e) = config.validate() {
            panic!("Expected valid config, got: {}", e);
        }
    }

    /// Assert a role's state and version.
    #[track_caller]
    pub fn assert_role(role: &RoleState, state: &str, version: u64) {
        assert_eq!(role.current_state, state, "Wrong state for actor {}", role.actor_id);
        assert_eq!(role.version, version, "Wrong version for actor {}", role.actor_id);
    }

    /// Assert timestamps never decrease.
    #[track_caller]
    pub fn assert_monotonic(events: &[CollaborationEvent]) {
        for pair in events.windows(2) {
            assert!(
                pair[0].timestamp <= pair[1].timestamp,
                "Event {} is later than the event after it",
                pair[0].id
            );
        }
    }
}
