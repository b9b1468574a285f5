//! Concord FSM - Team State Machine
//!
//! Validates and executes team transitions over a registered state graph.
//! A transition snapshots the state being left, runs exit hooks, commits,
//! then runs entry hooks; an entry hook failure rolls the commit back.
//!
//! # Example
//!
//! ```
//! use concord_core::TransitionContext;
//! use concord_events::NullNotifier;
//! use concord_fsm::TeamStateMachine;
//! use concord_snapshot::SnapshotManager;
//! use std::sync::Arc;
//!
//! let snapshots = Arc::new(SnapshotManager::new(100, 10, Arc::new(NullNotifier)));
//! let machine = TeamStateMachine::with_default_states(snapshots, Arc::new(NullNotifier)).unwrap();
//! let result = machine
//!     .transition("activate_team", &TransitionContext::new("kickoff"), None)
//!     .unwrap();
//! assert_eq!(result.to_state, "planning");
//! ```

mod affordance;
mod hooks;
mod machine;

pub use hooks::{
    AssertedConditions, ConditionEvaluator, HookPhase, NoopHooks, PermissiveConditions, StateHooks,
};
pub use machine::{StateTimeout, TeamStateMachine};
