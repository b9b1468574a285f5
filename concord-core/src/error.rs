//! Error types for Concord operations

use crate::{ActorId, EntityId, StateId};
use thiserror::Error;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("Serialization failed for {what}: {reason}")]
    SerializationFailed { what: String, reason: String },
}

/// Team state machine errors.
///
/// Every variant raised by a transition request names the requesting
/// session and, when known, the acting actor.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error(
        "Illegal transition: trigger '{trigger}' is not allowed from state '{from}' (session {session_id}, actor {})",
        actor_label(.actor)
    )]
    IllegalTransition {
        from: StateId,
        trigger: String,
        session_id: String,
        actor: Option<ActorId>,
    },

    #[error(
        "Unknown state '{state_id}' (trigger '{trigger}', session {session_id}, actor {})",
        actor_label(.actor)
    )]
    UnknownState {
        state_id: StateId,
        trigger: String,
        session_id: String,
        actor: Option<ActorId>,
    },

    #[error(
        "Conditions not met for '{trigger}' into '{state_id}': {unmet:?} (session {session_id}, actor {})",
        actor_label(.actor)
    )]
    ConditionsNotMet {
        state_id: StateId,
        trigger: String,
        unmet: Vec<String>,
        session_id: String,
        actor: Option<ActorId>,
    },

    #[error(
        "Transition already in progress, rejected trigger '{trigger}' (session {session_id}, actor {})",
        actor_label(.actor)
    )]
    TransitionInProgress {
        trigger: String,
        session_id: String,
        actor: Option<ActorId>,
    },

    #[error("State '{state_id}' is already registered")]
    DuplicateState { state_id: StateId },

    #[error(
        "{phase} hook failed for trigger '{trigger}': {reason} (session {session_id}, actor {})",
        actor_label(.actor)
    )]
    HookFailed {
        phase: String,
        trigger: String,
        reason: String,
        session_id: String,
        actor: Option<ActorId>,
    },
}

impl TransitionError {
    /// Session of the request that raised this error, if it came from one.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            TransitionError::IllegalTransition { session_id, .. }
            | TransitionError::UnknownState { session_id, .. }
            | TransitionError::ConditionsNotMet { session_id, .. }
            | TransitionError::TransitionInProgress { session_id, .. }
            | TransitionError::HookFailed { session_id, .. } => Some(session_id.as_str()),
            TransitionError::DuplicateState { .. } => None,
        }
    }
}

/// Role state store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RoleError {
    #[error("Actor already registered: {actor_id} (session {})", session_label(.session_id))]
    DuplicateActor {
        actor_id: ActorId,
        session_id: Option<String>,
    },

    #[error("Actor not registered: {actor_id} (session {})", session_label(.session_id))]
    UnknownActor {
        actor_id: ActorId,
        session_id: Option<String>,
    },
}

fn actor_label(actor: &Option<ActorId>) -> &str {
    actor.as_deref().unwrap_or("-")
}

fn session_label(session_id: &Option<String>) -> &str {
    session_id.as_deref().filter(|s| !s.is_empty()).unwrap_or("-")
}

/// Sync rule engine errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("Invalid sync rule '{rule_id}': {reason}")]
    InvalidRule { rule_id: String, reason: String },

    #[error("Sync rule not found: {rule_id}")]
    UnknownRule { rule_id: String },

    #[error("Queued sync not found: {queue_id}")]
    UnknownQueuedSync { queue_id: EntityId },

    #[error("Unresolved conflict syncing {source_actor} -> {target_actor} under rule '{rule_id}'")]
    SyncConflictUnresolved {
        rule_id: String,
        source_actor: ActorId,
        target_actor: ActorId,
    },
}

/// Snapshot errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("Snapshot not found: {snapshot_id}")]
    NotFound { snapshot_id: EntityId },

    #[error("Corrupt snapshot {snapshot_id}: expected checksum {expected}, computed {actual}")]
    CorruptSnapshot {
        snapshot_id: EntityId,
        expected: String,
        actual: String,
    },
}

/// Collaboration session errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session not found: {session_id}")]
    UnknownSession { session_id: EntityId },

    #[error("Session {session_id} is closed ({status})")]
    SessionClosed { session_id: EntityId, status: String },

    #[error("Status '{status}' is not terminal for session {session_id}")]
    InvalidTerminalStatus { session_id: EntityId, status: String },

    #[error("Session '{name}' needs at least one participant")]
    EmptyParticipants { name: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all Concord errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConcordError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Transition error: {0}")]
    Transition(#[from] TransitionError),

    #[error("Role error: {0}")]
    Role(#[from] RoleError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl ConcordError {
    /// Whether retrying the same request later may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ConcordError::Transition(TransitionError::ConditionsNotMet { .. })
                | ConcordError::Transition(TransitionError::TransitionInProgress { .. })
                | ConcordError::Sync(SyncError::SyncConflictUnresolved { .. })
        )
    }
}

/// Result type alias for Concord operations.
pub type ConcordResult<T> = Result<T, ConcordError>;

// =============================================================================
// TESTS
// =============================================================================
