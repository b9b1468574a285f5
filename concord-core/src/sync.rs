//! Sync rule, conflict and result types

use crate::{actor_matches, ActorId, EntityId, RoleState, StateData, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// RULES
// ============================================================================

/// What kind of change on the source actor fires a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum SyncTrigger {
    StateChange,
    DataUpdate,
    CapabilityChange,
    WorkloadChange,
    Manual,
}

impl SyncTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncTrigger::StateChange => "state_change",
            SyncTrigger::DataUpdate => "data_update",
            SyncTrigger::CapabilityChange => "capability_change",
            SyncTrigger::WorkloadChange => "workload_change",
            SyncTrigger::Manual => "manual",
        }
    }
}

/// When a fired rule executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum SyncType {
    /// Runs synchronously inside the trigger call
    Immediate,
    /// Queued until the next queue drain
    Batched,
    /// Queued until the next queue drain
    Scheduled,
    /// Runs synchronously, requires a condition
    Conditional,
}

impl SyncType {
    /// Whether rules of this type run inside the trigger call.
    pub fn is_synchronous(&self) -> bool {
        matches!(self, SyncType::Immediate | SyncType::Conditional)
    }
}

/// Declarative predicate over a (source, target) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum SyncCondition {
    SourceStateIs { state: String },
    TargetStateIs { state: String },
    /// Source payload has `key`, equal to `value` when one is given
    SourceDataHas {
        key: String,
        #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
        value: Option<Value>,
    },
    StatesDiffer,
    All { conditions: Vec<SyncCondition> },
    Any { conditions: Vec<SyncCondition> },
    Not { condition: Box<SyncCondition> },
}

impl SyncCondition {
    pub fn matches(&self, source: &RoleState, target: &RoleState) -> bool {
        match self {
            SyncCondition::SourceStateIs { state } => &source.current_state == state,
            SyncCondition::TargetStateIs { state } => &target.current_state == state,
            SyncCondition::SourceDataHas { key, value } => match source.state_data.get(key) {
                Some(found) => value.as_ref().map_or(true, |expected| found == expected),
                None => false,
            },
            SyncCondition::StatesDiffer => source.current_state != target.current_state,
            SyncCondition::All { conditions } => conditions.iter().all(|c| c.matches(source, target)),
            SyncCondition::Any { conditions } => conditions.iter().any(|c| c.matches(source, target)),
            SyncCondition::Not { condition } => !condition.matches(source, target),
        }
    }
}

/// Declarative projection of the source record into a payload patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum Transformation {
    /// Copy source key `from` into `to`
    Rename { from: String, to: String },
    /// Copy only the listed source keys
    Select { keys: Vec<String> },
    /// Emit a constant
    Set {
        key: String,
        #[cfg_attr(feature = "openapi", schema(value_type = Object))]
        value: Value,
    },
    /// Emit the source's current state under `key`
    SourceState { key: String },
    /// Apply each in order, later outputs overwrite earlier ones
    Chain { steps: Vec<Transformation> },
}

impl Transformation {
    pub fn apply(&self, source: &RoleState) -> StateData {
        let mut out = StateData::new();
        self.apply_into(source, &mut out);
        out
    }

    fn apply_into(&self, source: &RoleState, out: &mut StateData) {
        match self {
            Transformation::Rename { from, to } => {
                if let Some(value) = source.state_data.get(from) {
                    out.insert(to.clone(), value.clone());
                }
            }
            Transformation::Select { keys } => {
                for key in keys {
                    if let Some(value) = source.state_data.get(key) {
                        out.insert(key.clone(), value.clone());
                    }
                }
            }
            Transformation::Set { key, value } => {
                out.insert(key.clone(), value.clone());
            }
            Transformation::SourceState { key } => {
                out.insert(key.clone(), Value::String(source.current_state.clone()));
            }
            Transformation::Chain { steps } => {
                for step in steps {
                    step.apply_into(source, out);
                }
            }
        }
    }
}

/// How a detected state conflict is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum ConflictPolicy {
    /// Detect and resolve automatically
    #[default]
    Detect,
    /// Require caller-supplied input for state conflicts
    Manual,
}

/// Declarative propagation rule from one actor to others.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SyncRule {
    pub id: String,
    pub name: String,
    /// Actor id or `*`
    pub source_actor: ActorId,
    /// Actor ids; `*` expands to every registered actor but the source
    pub target_actors: Vec<ActorId>,
    pub trigger: SyncTrigger,
    pub sync_type: SyncType,
    pub condition: Option<SyncCondition>,
    pub transformation: Option<Transformation>,
    pub conflict_policy: ConflictPolicy,
    pub priority: i32,
}

impl SyncRule {
    pub fn new(
        id: impl Into<String>,
        source_actor: impl Into<ActorId>,
        target_actors: Vec<ActorId>,
        trigger: SyncTrigger,
        sync_type: SyncType,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            source_actor: source_actor.into(),
            target_actors,
            trigger,
            sync_type,
            condition: None,
            transformation: None,
            conflict_policy: ConflictPolicy::Detect,
            priority: 0,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_condition(mut self, condition: SyncCondition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_transformation(mut self, transformation: Transformation) -> Self {
        self.transformation = Some(transformation);
        self
    }

    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Whether this rule fires for `kind` on `actor_id`.
    pub fn fires_for(&self, actor_id: &str, kind: SyncTrigger) -> bool {
        self.trigger == kind && actor_matches(&self.source_actor, actor_id)
    }
}

// ============================================================================
// CONFLICTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum ConflictType {
    Version,
    State,
    Data,
    Capability,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum ResolutionStrategy {
    SourceWins,
    TargetWins,
    Merge,
    Manual,
}

/// Divergence detected between a source and a target during propagation.
/// Only ever recorded inside a [`SyncResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Conflict {
    pub actor_id: ActorId,
    pub conflict_type: ConflictType,
    pub description: String,
    pub resolution: ResolutionStrategy,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub resolved_value: Option<StateData>,
}

/// Published whenever propagation detects a conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ConflictNotice {
    pub rule_id: Option<String>,
    pub source_actor: ActorId,
    pub target_actor: ActorId,
    /// Session named in the target's role metadata
    pub session_id: Option<String>,
    pub conflict: Conflict,
    /// False when the conflict was left for manual resolution
    pub resolved: bool,
}

// ============================================================================
// RESULTS
// ============================================================================

/// A target that could not be synced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SyncFailure {
    pub actor_id: ActorId,
    pub error: String,
}

/// Audit record of one propagation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SyncResult {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub sync_id: EntityId,
    /// None for manual syncs
    pub rule_id: Option<String>,
    pub trigger: SyncTrigger,
    pub source_actor: ActorId,
    pub target_actors: Vec<ActorId>,
    pub synced_actors: Vec<ActorId>,
    pub conflicts: Vec<Conflict>,
    pub failures: Vec<SyncFailure>,
    /// Propagation depth, 0 for the originating update
    pub hop: usize,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub timestamp: Timestamp,
    pub success: bool,
    pub error: Option<String>,
}

/// A batched or scheduled rule firing waiting for the next drain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct QueuedSync {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub id: EntityId,
    pub rule_id: String,
    pub source_actor: ActorId,
    pub trigger: SyncTrigger,
    pub priority: i32,
    /// Enqueue order, breaks priority ties
    pub seq: u64,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub enqueued_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SyncStatus {
    pub total_roles: usize,
    pub total_rules: usize,
    pub queue_size: usize,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub last_sync_time: Option<Timestamp>,
    pub sync_in_progress: bool,
    pub recent_conflicts: Vec<Conflict>,
}

/// Filter for sync history queries. Empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SyncFilter {
    pub rule_id: Option<String>,
    /// Matches the source or any target
    pub actor: Option<ActorId>,
    pub success: Option<bool>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub since: Option<Timestamp>,
    /// Keep only the most recent `limit` matches
    pub limit: Option<usize>,
}

impl SyncFilter {
    pub fn matches(&self, result: &SyncResult) -> bool {
        if let Some(rule_id) = &self.rule_id {
            if result.rule_id.as_ref() != Some(rule_id) {
                return false;
            }
        }
        if let Some(actor) = &self.actor {
            if &result.source_actor != actor && !result.target_actors.contains(actor) {
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

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RoleMetadata;
    use chrono::Utc;
    use serde_json::json;

    fn role(actor: &str, state: &str, data: Value) -> RoleState {
        RoleState {
            actor_id: actor.to_string(),
            current_state: state.to_string(),
            previous_state: None,
            state_data: data.as_object().cloned().unwrap_or_default(),
            version: 1,
            last_updated: Utc::now(),
            metadata: RoleMetadata::default(),
        }
    }

    #[test]
    fn test_condition_combinators() {
        let source = role("a", "planning_complete", json!({"doc": "v1"}));
        let target = role("b", "READY", json!({}));

        let cond = SyncCondition::All {
            conditions: vec![
                SyncCondition::SourceStateIs {
                    state: "planning_complete".to_string(),
                },
                SyncCondition::SourceDataHas {
                    key: "doc".to_string(),
                    value: Some(json!("v1")),
                },
                SyncCondition::StatesDiffer,
            ],
        };
        assert!(cond.matches(&source, &target));

        let negated = SyncCondition::Not {
            condition: Box::new(cond),
        };
        assert!(!negated.matches(&source, &target));

        let any = SyncCondition::Any {
            conditions: vec![
                SyncCondition::TargetStateIs {
                    state: "BUSY".to_string(),
                },
                SyncCondition::SourceDataHas {
                    key: "doc".to_string(),
                    value: None,
                },
            ],
        };
        assert!(any.matches(&source, &target));
    }

    #[test]
    fn test_transformation_chain_later_wins() {
        let source = role("a", "DONE", json!({"x": 1, "y": 2, "z": 3}));
        let t = Transformation::Chain {
            steps: vec![
                Transformation::Select {
                    keys: vec!["x".to_string(), "missing".to_string()],
                },
                Transformation::Rename {
                    from: "y".to_string(),
                    to: "x".to_string(),
                },
                Transformation::SourceState {
                    key: "upstream".to_string(),
                },
            ],
        };
        let out = t.apply(&source);
        assert_eq!(out.get("x"), Some(&json!(2)));
        assert_eq!(out.get("upstream"), Some(&json!("DONE")));
        assert!(!out.contains_key("missing"));
        assert!(!out.contains_key("z"));
    }

    #[test]
    fn test_rule_fires_for_wildcard() {
        let rule = SyncRule::new(
            "balance",
            "*",
            vec!["*".to_string()],
            SyncTrigger::WorkloadChange,
            SyncType::Scheduled,
        );
        assert!(rule.fires_for("anyone", SyncTrigger::WorkloadChange));
        assert!(!rule.fires_for("anyone", SyncTrigger::StateChange));
    }

    #[test]
    fn test_condition_roundtrips_through_json() {
        let cond = SyncCondition::Not {
            condition: Box::new(SyncCondition::SourceStateIs {
                state: "DONE".to_string(),
            }),
        };
        let encoded = serde_json::to_value(&cond).unwrap();
        assert_eq!(encoded["kind"], json!("not"));
        let decoded: SyncCondition = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, cond);
    }
}
