//! Concord - Multi-Actor Collaborative State Synchronization
//!
//! One facade over the component crates:
//!
//! - `concord-roles`: per-actor versioned state, sync rules, conflict resolution
//! - `concord-snapshot`: checksum-verified team state snapshots
//! - `concord-fsm`: team state machine and affordances
//! - `concord-session`: collaboration sessions and process metrics
//!
//! ```
//! use concord_engine::{CollaborationEngine, EngineConfig, TransitionContext};
//!
//! let engine = CollaborationEngine::new(EngineConfig::default()).unwrap();
//! engine.register_role("architect", "READY", &TransitionContext::new("s")).unwrap();
//! let result = engine
//!     .transition("activate_team", &TransitionContext::new("s"), None)
//!     .unwrap();
//! assert!(result.success);
//! ```

mod engine;
mod observer;
pub mod telemetry;

pub use engine::CollaborationEngine;
pub use observer::{spawn_session_observer, ObserverHandle, ObserverStats};

pub use concord_core::*;
pub use concord_events::{
    BroadcastNotifier, FanoutNotifier, MemoryNotifier, Notification, NotificationSink,
    NullNotifier, SharedSink, Topic,
};
pub use concord_fsm::{
    AssertedConditions, ConditionEvaluator, NoopHooks, PermissiveConditions, StateHooks,
    StateTimeout, TeamStateMachine,
};
pub use concord_roles::{ConflictResolver, RoleStateStore, RoleUpdate, SyncRuleEngine, SyncSettings};
pub use concord_session::CollaborationSessionTracker;
pub use concord_snapshot::SnapshotManager;
