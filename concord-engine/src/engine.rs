//! Engine facade wiring every component to one config and one notifier

use crate::observer::{spawn_session_observer, ObserverHandle};
use concord_core::{
    ActorId, AffordanceResponse, AvailableAction, CollaborationEvent, CollaborationKind,
    CollaborationSession, ConcordResult, EngineConfig, EntityId, RoleState, SessionEventType,
    SessionMetadata, SessionStatus, StateData, StateTransitionResult, SyncFilter, SyncResult,
    SyncRule, SyncStatus, TeamState, Timestamp, TransitionContext, TransitionFilter,
};
use concord_events::{BroadcastNotifier, FanoutNotifier, Notification, SharedSink};
use concord_fsm::{StateTimeout, TeamStateMachine};
use concord_roles::{RoleStateStore, RoleUpdate, SyncRuleEngine, SyncSettings};
use concord_session::CollaborationSessionTracker;
use concord_snapshot::SnapshotManager;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

/// The collaborative state engine.
///
/// Every component publishes to the same bounded broadcast channel. Use
/// [`CollaborationEngine::subscribe`] to consume notifications and
/// [`CollaborationEngine::spawn_session_observer`] to feed sync conflicts
/// into the session tracker.
pub struct CollaborationEngine {
    config: EngineConfig,
    notifier: BroadcastNotifier,
    roles: Arc<RoleStateStore>,
    sync: Arc<SyncRuleEngine>,
    snapshots: Arc<SnapshotManager>,
    team: Arc<TeamStateMachine>,
    sessions: Arc<CollaborationSessionTracker>,
}

impl CollaborationEngine {
    pub fn new(config: EngineConfig) -> ConcordResult<Self> {
        Self::build(config, None)
    }

    /// Like [`CollaborationEngine::new`], additionally forwarding every
    /// notification to `sink`.
    pub fn with_sink(config: EngineConfig, sink: SharedSink) -> ConcordResult<Self> {
        Self::build(config, Some(sink))
    }

    /// Build from `CONCORD_*` environment variables.
    pub fn from_env() -> ConcordResult<Self> {
        Self::new(EngineConfig::from_env())
    }

    fn build(config: EngineConfig, extra: Option<SharedSink>) -> ConcordResult<Self> {
        config.validate()?;

        let notifier = BroadcastNotifier::new(config.notification_capacity);
        let sink: SharedSink = match extra {
            Some(extra) => Arc::new(FanoutNotifier::new().with(Arc::new(notifier.clone())).with(extra)),
            None => Arc::new(notifier.clone()),
        };

        let roles = Arc::new(RoleStateStore::new(sink.clone()));
        let sync = Arc::new(SyncRuleEngine::new(roles.clone(), sink.clone(), SyncSettings::from(&config)));
        let snapshots = Arc::new(SnapshotManager::from_config(&config, sink.clone()));
        let team = Arc::new(TeamStateMachine::with_default_states(snapshots.clone(), sink.clone())?.with_config(&config));
        let sessions = Arc::new(CollaborationSessionTracker::new(sink));

        info!(
            snapshot_capacity = config.snapshot_capacity,
            sync_batch_size = config.sync_batch_size,
            max_propagation_hops = config.max_propagation_hops,
            notification_capacity = config.notification_capacity,
            "Collaboration engine initialized"
        );

        Ok(Self {
            config,
            notifier,
            roles,
            sync,
            snapshots,
            team,
            sessions,
        })
    }

    // ------------------------------------------------------------------------
    // Components
    // ------------------------------------------------------------------------

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn roles(&self) -> &Arc<RoleStateStore> {
        &self.roles
    }

    pub fn sync(&self) -> &Arc<SyncRuleEngine> {
        &self.sync
    }

    pub fn snapshots(&self) -> &Arc<SnapshotManager> {
        &self.snapshots
    }

    pub fn team(&self) -> &Arc<TeamStateMachine> {
        &self.team
    }

    pub fn sessions(&self) -> &Arc<CollaborationSessionTracker> {
        &self.sessions
    }

    /// Subscribe to every notification published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifier.subscribe()
    }

    /// Start feeding conflict notifications into the session tracker.
    /// Must be called from within a tokio runtime.
    pub fn spawn_session_observer(&self) -> ObserverHandle {
        spawn_session_observer(self.subscribe(), self.sessions.clone())
    }

    // ------------------------------------------------------------------------
    // Team
    // ------------------------------------------------------------------------

    pub fn transition(
        &self,
        trigger: &str,
        context: &TransitionContext,
        target_override: Option<&str>,
    ) -> ConcordResult<StateTransitionResult> {
        self.team.transition(trigger, context, target_override)
    }

    pub fn current_state(&self) -> ConcordResult<TeamState> {
        self.team.current_state()
    }

    pub fn available_actions(&self, context: &TransitionContext) -> ConcordResult<Vec<AvailableAction>> {
        self.team.get_available_actions(context)
    }

    pub fn state_history(&self, filter: &TransitionFilter) -> ConcordResult<Vec<StateTransitionResult>> {
        self.team.history(filter)
    }

    pub fn affordance_response(&self, context: &TransitionContext) -> ConcordResult<AffordanceResponse> {
        self.team.affordance_response(context)
    }

    pub fn restore_snapshot(&self, snapshot_id: EntityId, context: &TransitionContext) -> ConcordResult<StateTransitionResult> {
        self.team.restore_snapshot(snapshot_id, context)
    }

    pub fn check_timeout(&self, now: Timestamp) -> ConcordResult<Option<StateTimeout>> {
        self.team.check_timeout(now)
    }

    // ------------------------------------------------------------------------
    // Roles and sync
    // ------------------------------------------------------------------------

    pub fn register_role(&self, actor_id: &str, initial_state: &str, context: &TransitionContext) -> ConcordResult<RoleState> {
        self.roles.register(actor_id, initial_state, context)
    }

    pub fn add_sync_rule(&self, rule: SyncRule) -> ConcordResult<()> {
        self.sync.add_rule(rule)
    }

    pub fn update_role(
        &self,
        actor_id: &str,
        new_state: &str,
        patch: Option<&StateData>,
        context: Option<&TransitionContext>,
    ) -> ConcordResult<RoleUpdate> {
        self.sync.update_role(actor_id, new_state, patch, context)
    }

    pub fn role_state(&self, actor_id: &str) -> ConcordResult<Option<RoleState>> {
        self.roles.get(actor_id)
    }

    pub fn process_sync_queue(&self) -> ConcordResult<Vec<SyncResult>> {
        self.sync.process_queue()
    }

    pub fn sync_status(&self) -> ConcordResult<SyncStatus> {
        self.sync.status()
    }

    pub fn sync_history(&self, filter: &SyncFilter) -> ConcordResult<Vec<SyncResult>> {
        self.sync.history(filter)
    }

    // ------------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------------

    pub fn start_session(
        &self,
        name: &str,
        participants: Vec<ActorId>,
        initiator: &str,
        kind: CollaborationKind,
        context: TransitionContext,
        metadata: SessionMetadata,
    ) -> ConcordResult<CollaborationSession> {
        self.sessions
            .start_session(name, participants, initiator, kind, context, metadata)
    }

    pub fn record_event(
        &self,
        session_id: EntityId,
        event_type: SessionEventType,
        actor: &str,
        data: StateData,
    ) -> ConcordResult<CollaborationEvent> {
        self.sessions.record_event(session_id, event_type, actor, data)
    }

    pub fn end_session(
        &self,
        session_id: EntityId,
        status: SessionStatus,
        outcome: Option<StateData>,
    ) -> ConcordResult<CollaborationSession> {
        self.sessions.end_session(session_id, status, outcome)
    }
}
