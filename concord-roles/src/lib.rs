//! Concord Roles - Per-Actor State and Propagation
//!
//! - [`RoleStateStore`]: versioned record per actor, sole writer of versions
//! - [`ConflictResolver`]: side-effect free source/target conflict resolution
//! - [`SyncRuleEngine`]: declarative rules that propagate changes between actors

mod conflict;
mod store;
mod sync;

pub use conflict::{ConflictResolver, PropagationPlan, Resolution, Unresolved};
pub use store::RoleStateStore;
pub use sync::{RoleUpdate, SyncRuleEngine, SyncSettings};
