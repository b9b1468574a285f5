//! Team state machine data types

use crate::{ActorId, EntityId, StateData, StateId, Timestamp, TransitionContext};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// State the team starts in.
pub const INITIAL_STATE: &str = "idle";

/// Category of a team state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum StateCategory {
    Operational,
    Collaborative,
    Transitional,
}

/// Definition of one node in the team state graph.
/// Immutable once registered with a machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct StateDefinition {
    pub id: StateId,
    pub name: String,
    pub description: String,
    /// trigger -> target state id
    pub allowed_transitions: BTreeMap<String, StateId>,
    pub entry_conditions: Vec<String>,
    pub exit_conditions: Vec<String>,
    pub category: StateCategory,
    pub priority: i32,
    /// Advisory time budget for staying in this state
    #[cfg_attr(feature = "openapi", schema(value_type = Option<u64>))]
    pub timeout: Option<Duration>,
    /// Team progress (0-100) on entering this state
    pub progress: u8,
}

impl StateDefinition {
    pub fn new(id: impl Into<StateId>, name: impl Into<String>, category: StateCategory) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            allowed_transitions: BTreeMap::new(),
            entry_conditions: Vec::new(),
            exit_conditions: Vec::new(),
            category,
            priority: 0,
            timeout: None,
            progress: 0,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_transition(mut self, trigger: impl Into<String>, target: impl Into<StateId>) -> Self {
        self.allowed_transitions.insert(trigger.into(), target.into());
        self
    }

    pub fn with_entry_condition(mut self, condition: impl Into<String>) -> Self {
        self.entry_conditions.push(condition.into());
        self
    }

    pub fn with_exit_condition(mut self, condition: impl Into<String>) -> Self {
        self.exit_conditions.push(condition.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = progress.min(100);
        self
    }

    /// Target state for a trigger, if the trigger is allowed here.
    pub fn target_for(&self, trigger: &str) -> Option<&StateId> {
        self.allowed_transitions.get(trigger)
    }
}

/// The default team workflow graph.
pub fn default_team_states() -> Vec<StateDefinition> {
    vec![
        StateDefinition::new("idle", "Idle", StateCategory::Operational)
            .with_description("Team is waiting for work to be assigned")
            .with_exit_condition("has_task")
            .with_exit_condition("team_activated")
            .with_transition("activate_team", "planning")
            .with_transition("assign_task", "planning")
            .with_priority(1)
            .with_progress(0),
        StateDefinition::new("planning", "Planning", StateCategory::Collaborative)
            .with_description("Team is planning the work and analysing requirements")
            .with_entry_condition("team_activated")
            .with_exit_condition("planning_complete")
            .with_exit_condition("requirements_defined")
            .with_transition("complete_planning", "development")
            .with_transition("need_analysis", "collaboration")
            .with_transition("cancel_project", "idle")
            .with_priority(2)
            .with_timeout(Duration::from_secs(60 * 60))
            .with_progress(20),
        StateDefinition::new("development", "Development", StateCategory::Operational)
            .with_description("Team is implementing the planned work")
            .with_entry_condition("planning_complete")
            .with_exit_condition("development_complete")
            .with_exit_condition("milestone_reached")
            .with_transition("complete_development", "review")
            .with_transition("need_collaboration", "collaboration")
            .with_transition("encounter_issue", "collaboration")
            .with_priority(3)
            .with_progress(50),
        StateDefinition::new("collaboration", "Collaboration", StateCategory::Collaborative)
            .with_description("Team is working through an issue together")
            .with_entry_condition("need_collaboration")
            .with_exit_condition("issue_resolved")
            .with_exit_condition("consensus_reached")
            .with_transition("resolve_issue", "development")
            .with_transition("complete_collaboration", "development")
            .with_transition("escalate_issue", "review")
            .with_priority(4)
            .with_progress(50),
        StateDefinition::new("review", "Review", StateCategory::Operational)
            .with_description("Team is reviewing and validating quality")
            .with_entry_condition("development_complete")
            .with_exit_condition("review_complete")
            .with_exit_condition("quality_approved")
            .with_transition("approve_quality", "deployment")
            .with_transition("request_changes", "development")
            .with_transition("need_rework", "planning")
            .with_priority(5)
            .with_progress(80),
        StateDefinition::new("deployment", "Deployment", StateCategory::Operational)
            .with_description("Team is deploying and releasing")
            .with_entry_condition("quality_approved")
            .with_exit_condition("deployment_complete")
            .with_transition("complete_deployment", "idle")
            .with_transition("deployment_failed", "review")
            .with_priority(6)
            .with_progress(95),
    ]
}

/// The single current team state of a machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct TeamState {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub id: EntityId,
    /// Id of the current StateDefinition
    pub collaboration_mode: StateId,
    pub active_actors: Vec<ActorId>,
    pub progress: u8,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub entered_at: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub metadata: StateData,
}

impl TeamState {
    pub fn new(initial_state: impl Into<StateId>) -> Self {
        Self {
            id: crate::new_entity_id(),
            collaboration_mode: initial_state.into(),
            active_actors: Vec::new(),
            progress: 0,
            entered_at: Utc::now(),
            metadata: StateData::new(),
        }
    }
}

/// Outcome of one transition attempt. Appended to the machine history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct StateTransitionResult {
    pub success: bool,
    pub from_state: StateId,
    pub to_state: StateId,
    pub trigger: String,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub timestamp: Timestamp,
    pub context: TransitionContext,
    pub side_effects: Vec<String>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "uuid"))]
    pub snapshot_id: Option<EntityId>,
    pub error: Option<String>,
}

/// An outgoing edge from the current state, scored by past success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AvailableAction {
    pub trigger: String,
    pub target_state: StateId,
    pub description: String,
    /// 0-100
    pub confidence: f64,
    /// Entry conditions of the target state
    pub prerequisites: Vec<String>,
}

/// Filter for transition history queries. Empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct TransitionFilter {
    pub trigger: Option<String>,
    /// Matches either side of the transition
    pub state: Option<StateId>,
    pub success: Option<bool>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub since: Option<Timestamp>,
    /// Keep only the most recent `limit` matches
    pub limit: Option<usize>,
}

impl TransitionFilter {
    pub fn matches(&self, result: &StateTransitionResult) -> bool {
        if let Some(trigger) = &self.trigger {
            if &result.trigger != trigger {
                return false;
            }
        }
        if let Some(state) = &self.state {
            if &result.from_state != state && &result.to_state != state {
                return false;
            }
        }
        if let Some(success) = self.success {
            if result.success != success {
                return false;
            }
        }
        if let Some(since) = self.since {
            if result.timestamp < since {
                return false;
            }
        }
        true
    }
}

/// A visited state with the time it was reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Breadcrumb {
    pub state: StateId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Navigation {
    /// Destinations of the last few transitions
    pub current_path: Vec<StateId>,
    /// States reachable from the current one
    pub possible_paths: Vec<StateId>,
    pub breadcrumbs: Vec<Breadcrumb>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct RecoveryOption {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub snapshot_id: EntityId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub timestamp: Timestamp,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct QualityMetrics {
    /// Percentage of successful attempts; 100 with no history
    pub transition_success_rate: f64,
    pub total_transitions: usize,
    pub failed_transitions: usize,
}

/// Everything a client needs to decide what to do next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AffordanceResponse {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub timestamp: Timestamp,
    pub current_state: TeamState,
    pub state_name: String,
    pub state_description: String,
    pub next_actions: Vec<AvailableAction>,
    pub navigation: Navigation,
    pub recovery_options: Vec<RecoveryOption>,
    pub quality: QualityMetrics,
}
