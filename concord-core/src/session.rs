//! Collaboration session types

use crate::{ActorId, EntityId, StateData, Timestamp, TransitionContext};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lifecycle status of a collaboration session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum SessionStatus {
    Initiated,
    Active,
    Completed,
    Cancelled,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Cancelled | SessionStatus::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Initiated => "initiated",
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum CollaborationKind {
    Brainstorming,
    ProblemSolving,
    DecisionMaking,
    KnowledgeSharing,
    CodeReview,
    Planning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum SessionEventType {
    Join,
    Leave,
    Contribute,
    Question,
    Decision,
    Conflict,
    Resolution,
}

impl SessionEventType {
    /// Fixed impact of an event of this type.
    pub fn impact(&self) -> EventImpact {
        let (productivity, quality, engagement, consensus) = match self {
            SessionEventType::Join => (10, 5, 20, 0),
            SessionEventType::Contribute => (15, 10, 10, 5),
            SessionEventType::Question => (-5, 15, 10, -5),
            SessionEventType::Decision => (20, 15, 5, 25),
            SessionEventType::Conflict => (-20, -10, 5, -30),
            SessionEventType::Resolution => (25, 20, 15, 40),
            SessionEventType::Leave => (0, 0, 0, 0),
        };
        EventImpact {
            productivity,
            quality,
            engagement,
            consensus,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct EventImpact {
    pub productivity: i32,
    pub quality: i32,
    pub engagement: i32,
    pub consensus: i32,
}

/// Planning data supplied when a session starts.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SessionMetadata {
    pub objective: String,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<u64>))]
    pub expected_duration: Option<Duration>,
    pub priority: i32,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CollaborationSession {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub id: EntityId,
    pub name: String,
    pub participants: Vec<ActorId>,
    pub initiator: ActorId,
    pub kind: CollaborationKind,
    pub status: SessionStatus,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub start_time: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub end_time: Option<Timestamp>,
    pub context: TransitionContext,
    pub metadata: SessionMetadata,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub outcome: Option<StateData>,
}

impl CollaborationSession {
    /// Wall-clock duration, measured to `now` while the session is open.
    pub fn duration(&self, now: Timestamp) -> chrono::Duration {
        self.end_time.unwrap_or(now) - self.start_time
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CollaborationEvent {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub id: EntityId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub session_id: EntityId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub timestamp: Timestamp,
    pub event_type: SessionEventType,
    pub actor: ActorId,
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub data: StateData,
    pub impact: EventImpact,
}

/// Derived metrics of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SessionMetrics {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub session_id: EntityId,
    pub duration_ms: i64,
    pub participant_count: usize,
    pub event_count: usize,
    pub average_productivity: f64,
    pub average_quality: f64,
    pub average_engagement: f64,
    pub consensus_level: f64,
    pub conflict_count: usize,
    /// Percentage, 100 when there were no conflicts
    pub resolution_rate: f64,
}

/// Running statistics for sessions sharing the same participant set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CollaborationPattern {
    /// Sorted, comma-joined participant ids
    pub key: String,
    pub name: String,
    pub participants: Vec<ActorId>,
    pub kind: CollaborationKind,
    pub frequency: u32,
    pub success_rate: f64,
    pub average_duration_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct EffectivenessReport {
    pub total_sessions: usize,
    pub average_success_rate: f64,
    pub most_effective_patterns: Vec<CollaborationPattern>,
    pub improvement_areas: Vec<String>,
    /// Standing practices for running sessions
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct OutcomePrediction {
    pub success_probability: f64,
    pub expected_duration_ms: f64,
    pub similar_sessions: usize,
    pub risk_factors: Vec<String>,
    pub recommendations: Vec<String>,
}
