//! Per-actor role state records

use crate::{ActorId, RoleMetadata, StateData, Timestamp};
use serde::{Deserialize, Serialize};

/// Versioned state record for one actor.
///
/// `version` starts at 1 on registration and grows by exactly one per committed
/// write. Only the role store commits writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct RoleState {
    pub actor_id: ActorId,
    pub current_state: String,
    pub previous_state: Option<String>,
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub state_data: StateData,
    pub version: u64,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub last_updated: Timestamp,
    pub metadata: RoleMetadata,
}

/// A proposed write to a role record, produced by a read-decide closure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct RoleWrite {
    /// State after the write
    pub current_state: String,
    /// Full payload after the write
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub state_data: StateData,
    /// Set when the write comes from propagation
    pub synced_from: Option<ActorId>,
}

impl RoleWrite {
    /// A write that keeps the record's state and payload as-is.
    pub fn keep(role: &RoleState) -> Self {
        Self {
            current_state: role.current_state.clone(),
            state_data: role.state_data.clone(),
            synced_from: None,
        }
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.current_state = state.into();
        self
    }

    pub fn with_data(mut self, data: StateData) -> Self {
        self.state_data = data;
        self
    }

    pub fn synced_from(mut self, actor_id: impl Into<ActorId>) -> Self {
        self.synced_from = Some(actor_id.into());
        self
    }
}
