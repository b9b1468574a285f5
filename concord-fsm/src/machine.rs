//! The team state machine

use crate::hooks::{ConditionEvaluator, HookPhase, NoopHooks, PermissiveConditions, StateHooks};
use chrono::Utc;
use concord_core::{
    default_team_states, AvailableAction, ConcordError, ConcordResult, EngineConfig, EntityId,
    StateDefinition, StateId, StateTransitionResult, StorageError, TeamState, Timestamp,
    TransitionContext, TransitionError, TransitionFilter, INITIAL_STATE,
};
use concord_events::{publish, SharedSink, Topic};
use concord_snapshot::SnapshotManager;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, error, info, warn};

const SOURCE: &str = "team_state_machine";
pub(crate) const RESTORE_TRIGGER: &str = "restore_snapshot";
const DEFAULT_CONFIDENCE: f64 = 80.0;

// ============================================================================
// NOTIFICATION PAYLOADS
// ============================================================================

#[derive(Debug, Clone, Serialize)]
struct TransitionedNotice<'a> {
    result: &'a StateTransitionResult,
    previous_state: &'a TeamState,
    current_state: &'a TeamState,
}

#[derive(Debug, Clone, Serialize)]
struct RestoredNotice<'a> {
    snapshot_id: EntityId,
    previous_state: &'a TeamState,
    current_state: &'a TeamState,
}

/// Advisory notice that the team stayed in a state past its time budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateTimeout {
    pub state: StateId,
    pub entered_at: Timestamp,
    pub timeout_secs: u64,
    pub elapsed_secs: u64,
}

// ============================================================================
// IN-PROGRESS GUARD
// ============================================================================

/// Holds the machine's single transition slot until dropped.
struct InProgressGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> InProgressGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for InProgressGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// What an attempt resolved before it stopped.
#[derive(Default)]
struct Attempt {
    target: Option<StateId>,
    snapshot_id: Option<EntityId>,
}

// ============================================================================
// TEAM STATE MACHINE
// ============================================================================

/// Team-level finite state machine.
///
/// Transitions are serialized: a second request while one is running fails
/// with `TransitionInProgress`. Every committed transition is preceded by a
/// snapshot of the state being left.
pub struct TeamStateMachine {
    states: RwLock<BTreeMap<StateId, StateDefinition>>,
    current: RwLock<TeamState>,
    history: RwLock<Vec<StateTransitionResult>>,
    snapshots: Arc<SnapshotManager>,
    evaluator: Box<dyn ConditionEvaluator>,
    hooks: Box<dyn StateHooks>,
    in_progress: AtomicBool,
    /// `entered_at` of the state entry whose timeout was already reported
    timeout_reported: Mutex<Option<Timestamp>>,
    default_confidence: f64,
    sink: SharedSink,
}

impl TeamStateMachine {
    /// Create a machine with no registered states, starting in `initial_state`.
    pub fn new(initial_state: impl Into<StateId>, snapshots: Arc<SnapshotManager>, sink: SharedSink) -> Self {
        Self {
            states: RwLock::new(BTreeMap::new()),
            current: RwLock::new(TeamState::new(initial_state)),
            history: RwLock::new(Vec::new()),
            snapshots,
            evaluator: Box::new(PermissiveConditions),
            hooks: Box::new(NoopHooks),
            in_progress: AtomicBool::new(false),
            timeout_reported: Mutex::new(None),
            default_confidence: DEFAULT_CONFIDENCE,
            sink,
        }
    }

    /// Create a machine with the default team workflow, starting idle.
    pub fn with_default_states(snapshots: Arc<SnapshotManager>, sink: SharedSink) -> ConcordResult<Self> {
        let machine = Self::new(INITIAL_STATE, snapshots, sink);
        for definition in default_team_states() {
            machine.register_state(definition)?;
        }
        Ok(machine)
    }

    pub fn with_evaluator(mut self, evaluator: impl ConditionEvaluator + 'static) -> Self {
        self.evaluator = Box::new(evaluator);
        self
    }

    pub fn with_hooks(mut self, hooks: impl StateHooks + 'static) -> Self {
        self.hooks = Box::new(hooks);
        self
    }

    /// Confidence reported for edges that have no history yet.
    pub fn with_default_confidence(mut self, confidence: f64) -> Self {
        self.default_confidence = confidence.clamp(0.0, 100.0);
        self
    }

    pub fn with_config(self, config: &EngineConfig) -> Self {
        self.with_default_confidence(config.default_action_confidence)
    }

    /// Register a state definition. Definitions are immutable once registered.
    pub fn register_state(&self, definition: StateDefinition) -> ConcordResult<()> {
        let mut states = self
            .states
            .write()
            .map_err(|_| ConcordError::Storage(StorageError::LockPoisoned))?;
        if states.contains_key(&definition.id) {
            return Err(TransitionError::DuplicateState {
                state_id: definition.id,
            }
            .into());
        }
        debug!(state = %definition.id, edges = definition.allowed_transitions.len(), "State registered");
        states.insert(definition.id.clone(), definition);
        Ok(())
    }

    pub fn state_definition(&self, state_id: &str) -> ConcordResult<Option<StateDefinition>> {
        Ok(self.read_states()?.get(state_id).cloned())
    }

    /// All registered definitions, ordered by id.
    pub fn state_definitions(&self) -> ConcordResult<Vec<StateDefinition>> {
        Ok(self.read_states()?.values().cloned().collect())
    }

    /// A copy of the current team state.
    pub fn current_state(&self) -> ConcordResult<TeamState> {
        self.current
            .read()
            .map(|state| state.clone())
            .map_err(|_| ConcordError::Storage(StorageError::LockPoisoned))
    }

    pub fn snapshots(&self) -> &Arc<SnapshotManager> {
        &self.snapshots
    }

    /// Request a transition by trigger.
    ///
    /// # Arguments
    /// * `trigger` - Edge label, must be allowed from the current state
    /// * `context` - Request context, recorded with the result and snapshot
    /// * `target_override` - Target to use instead of the edge's own target
    ///
    /// # Returns
    /// The committed result. Failed attempts are recorded in history and
    /// returned as errors, leaving the current state unchanged.
    pub fn transition(
        &self,
        trigger: &str,
        context: &TransitionContext,
        target_override: Option<&str>,
    ) -> ConcordResult<StateTransitionResult> {
        let Some(_guard) = InProgressGuard::acquire(&self.in_progress) else {
            warn!(trigger = %trigger, session_id = %context.session_id, "Transition rejected, another is running");
            return Err(TransitionError::TransitionInProgress {
                trigger: trigger.to_string(),
                session_id: context.session_id.clone(),
                actor: context.actor.clone(),
            }
            .into());
        };

        let before = self.current_state()?;
        let mut attempt = Attempt {
            target: target_override.map(str::to_string),
            snapshot_id: None,
        };

        info!(
            from = %before.collaboration_mode,
            trigger = %trigger,
            target = ?attempt.target,
            session_id = %context.session_id,
            "Starting team transition"
        );

        match self.execute(trigger, context, &before, &mut attempt) {
            Ok(result) => {
                self.push_history(result.clone())?;
                let current = self.current_state()?;
                info!(
                    from = %result.from_state,
                    to = %result.to_state,
                    trigger = %trigger,
                    "Team transition committed"
                );
                publish(
                    self.sink.as_ref(),
                    Topic::TeamTransitioned,
                    SOURCE,
                    &TransitionedNotice {
                        result: &result,
                        previous_state: &before,
                        current_state: &current,
                    },
                );
                Ok(result)
            }
            Err(err) => {
                let result = StateTransitionResult {
                    success: false,
                    from_state: before.collaboration_mode.clone(),
                    to_state: attempt.target.unwrap_or_else(|| "unknown".to_string()),
                    trigger: trigger.to_string(),
                    timestamp: Utc::now(),
                    context: context.clone(),
                    side_effects: Vec::new(),
                    snapshot_id: attempt.snapshot_id,
                    error: Some(err.to_string()),
                };
                error!(
                    from = %result.from_state,
                    to = %result.to_state,
                    trigger = %trigger,
                    error = %err,
                    "Team transition failed"
                );
                self.push_history(result.clone())?;
                publish(self.sink.as_ref(), Topic::TeamTransitionFailed, SOURCE, &result);
                Err(err)
            }
        }
    }

    fn execute(
        &self,
        trigger: &str,
        context: &TransitionContext,
        before: &TeamState,
        attempt: &mut Attempt,
    ) -> ConcordResult<StateTransitionResult> {
        let from = before.collaboration_mode.clone();
        let (from_def, target_def) = {
            let states = self.read_states()?;
            let from_def = states
                .get(&from)
                .cloned()
                .ok_or_else(|| TransitionError::UnknownState {
                    state_id: from.clone(),
                    trigger: trigger.to_string(),
                    session_id: context.session_id.clone(),
                    actor: context.actor.clone(),
                })?;
            let edge_target = from_def
                .target_for(trigger)
                .ok_or_else(|| TransitionError::IllegalTransition {
                    from: from.clone(),
                    trigger: trigger.to_string(),
                    session_id: context.session_id.clone(),
                    actor: context.actor.clone(),
                })?;
            let target_id = attempt.target.get_or_insert_with(|| edge_target.clone()).clone();
            let target_def = states
                .get(&target_id)
                .cloned()
                .ok_or_else(|| TransitionError::UnknownState {
                    state_id: target_id,
                    trigger: trigger.to_string(),
                    session_id: context.session_id.clone(),
                    actor: context.actor.clone(),
                })?;
            (from_def, target_def)
        };

        let mut unmet: Vec<String> = Vec::new();
        for condition in from_def.exit_conditions.iter().chain(&target_def.entry_conditions) {
            if !unmet.contains(condition) && !self.evaluator.is_satisfied(condition, context, before) {
                unmet.push(condition.clone());
            }
        }
        if !unmet.is_empty() {
            debug!(trigger = %trigger, unmet = ?unmet, "Transition conditions not met");
            return Err(TransitionError::ConditionsNotMet {
                state_id: target_def.id.clone(),
                trigger: trigger.to_string(),
                unmet,
                session_id: context.session_id.clone(),
                actor: context.actor.clone(),
            }
            .into());
        }

        let snapshot = self.snapshots.capture(before, context)?;
        attempt.snapshot_id = Some(snapshot.id);

        self.hooks
            .on_exit(&from_def, before, context)
            .map_err(|e| hook_failed(HookPhase::Exit, trigger, context, e))?;

        let next = enter_state(before, &target_def, context, trigger);
        self.replace_current(next.clone())?;

        if let Err(e) = self.hooks.on_enter(&target_def, &next, context) {
            self.replace_current(before.clone())?;
            warn!(
                trigger = %trigger,
                state = %target_def.id,
                "Entry hook failed, team state rolled back"
            );
            return Err(hook_failed(HookPhase::Entry, trigger, context, e));
        }

        Ok(StateTransitionResult {
            success: true,
            from_state: from.clone(),
            to_state: target_def.id.clone(),
            trigger: trigger.to_string(),
            timestamp: Utc::now(),
            context: context.clone(),
            side_effects: side_effects(&from, &target_def.id),
            snapshot_id: Some(snapshot.id),
            error: None,
        })
    }

    /// Restore the team to a previously captured snapshot.
    ///
    /// The snapshot checksum is verified first. A corrupt or unknown snapshot
    /// leaves the current state untouched.
    pub fn restore_snapshot(&self, snapshot_id: EntityId, context: &TransitionContext) -> ConcordResult<StateTransitionResult> {
        let Some(_guard) = InProgressGuard::acquire(&self.in_progress) else {
            return Err(TransitionError::TransitionInProgress {
                trigger: RESTORE_TRIGGER.to_string(),
                session_id: context.session_id.clone(),
                actor: context.actor.clone(),
            }
            .into());
        };

        let restored = self.snapshots.restore(snapshot_id)?;
        let before = self.current_state()?;
        self.replace_current(restored.clone())?;

        let result = StateTransitionResult {
            success: true,
            from_state: before.collaboration_mode.clone(),
            to_state: restored.collaboration_mode.clone(),
            trigger: RESTORE_TRIGGER.to_string(),
            timestamp: Utc::now(),
            context: context.clone(),
            side_effects: vec!["state_restored_from_snapshot".to_string()],
            snapshot_id: Some(snapshot_id),
            error: None,
        };
        self.push_history(result.clone())?;

        info!(
            snapshot_id = %snapshot_id,
            from = %before.collaboration_mode,
            to = %restored.collaboration_mode,
            "Team state restored from snapshot"
        );
        publish(
            self.sink.as_ref(),
            Topic::TeamRestored,
            SOURCE,
            &RestoredNotice {
                snapshot_id,
                previous_state: &before,
                current_state: &restored,
            },
        );
        Ok(result)
    }

    /// Outgoing edges of the current state, highest confidence first.
    ///
    /// Confidence is the historical success rate of the exact
    /// `(trigger, target)` pair, or the default when it was never attempted.
    pub fn get_available_actions(&self, _context: &TransitionContext) -> ConcordResult<Vec<AvailableAction>> {
        let current = self.current_state()?;
        let states = self.read_states()?;
        let Some(definition) = states.get(&current.collaboration_mode) else {
            return Ok(Vec::new());
        };
        let history = self.read_history()?;

        let mut actions: Vec<AvailableAction> = definition
            .allowed_transitions
            .iter()
            .filter_map(|(trigger, target)| {
                let target_def = states.get(target)?;
                Some(AvailableAction {
                    trigger: trigger.clone(),
                    target_state: target.clone(),
                    description: format!("Transition to {}", target_def.name),
                    confidence: self.confidence(&history, trigger, target),
                    prerequisites: target_def.entry_conditions.clone(),
                })
            })
            .collect();
        actions.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        Ok(actions)
    }

    fn confidence(&self, history: &[StateTransitionResult], trigger: &str, target: &str) -> f64 {
        let (total, succeeded) = history
            .iter()
            .filter(|h| h.trigger == trigger && h.to_state == target)
            .fold((0usize, 0usize), |(total, ok), h| (total + 1, ok + usize::from(h.success)));
        if total == 0 {
            return self.default_confidence;
        }
        (succeeded as f64 / total as f64 * 100.0).min(100.0)
    }

    /// Transition history matching `filter`, oldest first.
    pub fn history(&self, filter: &TransitionFilter) -> ConcordResult<Vec<StateTransitionResult>> {
        let history = self.read_history()?;
        let mut matched: Vec<StateTransitionResult> =
            history.iter().filter(|h| filter.matches(h)).cloned().collect();
        if let Some(limit) = filter.limit {
            let skip = matched.len().saturating_sub(limit);
            matched.drain(..skip);
        }
        Ok(matched)
    }

    pub fn history_len(&self) -> ConcordResult<usize> {
        Ok(self.read_history()?.len())
    }

    /// Report, once per state entry, that the current state outlived its
    /// timeout. The state is left unchanged.
    pub fn check_timeout(&self, now: Timestamp) -> ConcordResult<Option<StateTimeout>> {
        let current = self.current_state()?;
        let Some(timeout) = self
            .read_states()?
            .get(&current.collaboration_mode)
            .and_then(|d| d.timeout)
        else {
            return Ok(None);
        };

        let elapsed = (now - current.entered_at).to_std().unwrap_or_default();
        if elapsed < timeout {
            return Ok(None);
        }

        let mut reported = self
            .timeout_reported
            .lock()
            .map_err(|_| ConcordError::Storage(StorageError::LockPoisoned))?;
        if *reported == Some(current.entered_at) {
            return Ok(None);
        }
        *reported = Some(current.entered_at);

        let notice = StateTimeout {
            state: current.collaboration_mode,
            entered_at: current.entered_at,
            timeout_secs: timeout.as_secs(),
            elapsed_secs: elapsed.as_secs(),
        };
        warn!(state = %notice.state, elapsed_secs = notice.elapsed_secs, "Team state timed out");
        publish(self.sink.as_ref(), Topic::TeamStateTimeout, SOURCE, &notice);
        Ok(Some(notice))
    }

    pub(crate) fn read_states(
        &self,
    ) -> ConcordResult<std::sync::RwLockReadGuard<'_, BTreeMap<StateId, StateDefinition>>> {
        self.states
            .read()
            .map_err(|_| ConcordError::Storage(StorageError::LockPoisoned))
    }

    pub(crate) fn read_history(&self) -> ConcordResult<std::sync::RwLockReadGuard<'_, Vec<StateTransitionResult>>> {
        self.history
            .read()
            .map_err(|_| ConcordError::Storage(StorageError::LockPoisoned))
    }

    fn push_history(&self, result: StateTransitionResult) -> ConcordResult<()> {
        self.history
            .write()
            .map_err(|_| ConcordError::Storage(StorageError::LockPoisoned))?
            .push(result);
        Ok(())
    }

    fn replace_current(&self, state: TeamState) -> ConcordResult<()> {
        *self
            .current
            .write()
            .map_err(|_| ConcordError::Storage(StorageError::LockPoisoned))? = state;
        Ok(())
    }
}

fn hook_failed(phase: HookPhase, trigger: &str, context: &TransitionContext, err: ConcordError) -> ConcordError {
    TransitionError::HookFailed {
        phase: phase.as_str().to_string(),
        trigger: trigger.to_string(),
        reason: err.to_string(),
        session_id: context.session_id.clone(),
        actor: context.actor.clone(),
    }
    .into()
}

/// Build the team state committed on entering `target`.
fn enter_state(before: &TeamState, target: &StateDefinition, context: &TransitionContext, trigger: &str) -> TeamState {
    let now = Utc::now();
    let mut metadata = before.metadata.clone();
    metadata.insert("last_transition".to_string(), json!(now.to_rfc3339()));
    metadata.insert("last_trigger".to_string(), json!(trigger));
    metadata.insert("transition_session".to_string(), json!(context.session_id));

    TeamState {
        id: before.id,
        collaboration_mode: target.id.clone(),
        active_actors: context
            .active_actors
            .clone()
            .unwrap_or_else(|| before.active_actors.clone()),
        progress: target.progress,
        entered_at: now,
        metadata,
    }
}

fn side_effects(from: &str, to: &str) -> Vec<String> {
    let mut effects = Vec::new();
    if from == "idle" && to == "planning" {
        effects.push("team_activated".to_string());
    }
    if to == "collaboration" {
        effects.push("increased_communication".to_string());
    }
    effects
}

// ============================================================================
// TESTS
// ============================================================================


#[cfg(test)]
mod prop_tests {
    use super::*;
    use concord_events::NullNotifier;
    use proptest::prelude::*;

    const TRIGGERS: &[&str] = &[
        "activate_team",
        "assign_task",
        "complete_planning",
        "need_analysis",
        "cancel_project",
        "complete_development",
        "need_collaboration",
        "encounter_issue",
        "resolve_issue",
        "complete_collaboration",
        "escalate_issue",
        "approve_quality",
        "request_changes",
        "need_rework",
        "complete_deployment",
        "deployment_failed",
        "deploy",
    ];

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Every committed transition has exactly one verifying snapshot of
        /// the state it left, and failures never change the state.
        #[test]
        fn prop_snapshot_per_commit(picks in prop::collection::vec(0usize..TRIGGERS.len(), 1..30)) {
            let snapshots = Arc::new(SnapshotManager::new(1000, 10, Arc::new(NullNotifier)));
            let machine = TeamStateMachine::with_default_states(snapshots.clone(), Arc::new(NullNotifier)).unwrap();
            let mut committed = 0usize;

            for pick in picks {
                let before = machine.current_state().unwrap();
                match machine.transition(TRIGGERS[pick], &TransitionContext::default(), None) {
                    Ok(result) => {
                        committed += 1;
                        let left = snapshots.restore(result.snapshot_id.unwrap()).unwrap();
                        prop_assert_eq!(left, before);
                    }
                    Err(_) => prop_assert_eq!(machine.current_state().unwrap(), before),
                }
            }
            prop_assert_eq!(snapshots.len().unwrap(), committed);
        }
    }
}
