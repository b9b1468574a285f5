//! Team state snapshots

use crate::{content_checksum, EntityId, StorageError, TeamState, Timestamp, TransitionContext};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Immutable, checksummed copy of a team state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Snapshot {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub id: EntityId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub timestamp: Timestamp,
    pub team_state: TeamState,
    pub context: TransitionContext,
    /// Hex SHA-256 of the JSON encoding of `team_state`
    pub checksum: String,
}

impl Snapshot {
    /// Copy `team_state` and seal it with its checksum.
    pub fn seal(team_state: &TeamState, context: &TransitionContext) -> Result<Self, StorageError> {
        Ok(Self {
            id: crate::new_entity_id(),
            timestamp: Utc::now(),
            checksum: team_state_checksum(team_state)?,
            team_state: team_state.clone(),
            context: context.clone(),
        })
    }

    /// Recompute the checksum of the stored team state.
    pub fn compute_checksum(&self) -> Result<String, StorageError> {
        team_state_checksum(&self.team_state)
    }

    /// Whether the stored checksum matches the stored team state.
    pub fn verify(&self) -> Result<bool, StorageError> {
        Ok(self.compute_checksum()? == self.checksum)
    }
}

/// Hex SHA-256 over the canonical JSON encoding of a team state.
///
/// Maps serialize in key order, so equal states always hash equally.
pub fn team_state_checksum(team_state: &TeamState) -> Result<String, StorageError> {
    let bytes = serde_json::to_vec(team_state).map_err(|e| StorageError::SerializationFailed {
        what: "team_state".to_string(),
        reason: e.to_string(),
    })?;
    Ok(content_checksum(&bytes))
}
