//! Structured payload and context types.
//!
//! State payloads are opaque to the engine: they are JSON object maps that the
//! engine merges shallowly but never interprets. Contexts and role metadata are
//! typed so callers cannot smuggle arbitrary shapes through the core.

use crate::{ActorId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Opaque structured state payload (ordered map for deterministic hashing).
pub type StateData = serde_json::Map<String, serde_json::Value>;

/// Shallow-merge `patch` into `base`; keys in `patch` overwrite.
pub fn merge_state_data(base: &mut StateData, patch: &StateData) {
    for (key, value) in patch {
        base.insert(key.clone(), value.clone());
    }
}

/// Shallow-merge `other` into `base`, keeping `base` on overlapping keys.
pub fn merge_state_data_keep_existing(base: &mut StateData, other: &StateData) {
    for (key, value) in other {
        if !base.contains_key(key) {
            base.insert(key.clone(), value.clone());
        }
    }
}

/// Context attached to a team transition request or a role write.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct TransitionContext {
    /// Session the request belongs to
    pub session_id: String,
    /// Team the request targets (if any)
    pub team_id: Option<String>,
    /// Actor issuing the request (if any)
    pub actor: Option<ActorId>,
    /// Replacement for the team's active actors, applied on commit
    pub active_actors: Option<Vec<ActorId>>,
    /// Condition names the caller asserts as satisfied
    pub satisfied_conditions: BTreeSet<String>,
    /// Free-form structured attributes
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub attributes: StateData,
}

impl TransitionContext {
    /// Create a context for a session.
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Self::default()
        }
    }

    /// Set the requesting actor.
    pub fn with_actor(mut self, actor: impl Into<ActorId>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Set the team id.
    pub fn with_team(mut self, team_id: impl Into<String>) -> Self {
        self.team_id = Some(team_id.into());
        self
    }

    /// Replace the team's active actors when the transition commits.
    pub fn with_active_actors<I, S>(mut self, actors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ActorId>,
    {
        self.active_actors = Some(actors.into_iter().map(Into::into).collect());
        self
    }

    /// Assert a named condition as satisfied.
    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.satisfied_conditions.insert(condition.into());
        self
    }

    /// Attach a structured attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Whether the caller asserted a condition.
    pub fn has_condition(&self, condition: &str) -> bool {
        self.satisfied_conditions.contains(condition)
    }
}

/// Per-actor metadata carried on a role state record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct RoleMetadata {
    /// Session the actor is currently working in
    pub session_id: Option<String>,
    /// Capabilities advertised by the actor
    pub capabilities: Vec<String>,
    /// Current workload units
    pub workload: u32,
    /// Actor whose propagation produced the latest write
    pub synced_from: Option<ActorId>,
    /// When the latest propagated write landed
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub synced_at: Option<Timestamp>,
}

impl RoleMetadata {
    /// Metadata seeded from a registration context.
    pub fn from_context(context: &TransitionContext) -> Self {
        Self {
            session_id: if context.session_id.is_empty() {
                None
            } else {
                Some(context.session_id.clone())
            },
            ..Self::default()
        }
    }
}
