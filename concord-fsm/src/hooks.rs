//! Condition evaluation and state entry/exit hooks

use concord_core::{ConcordResult, StateDefinition, TeamState, TransitionContext};

/// Decides whether a named entry or exit condition holds.
pub trait ConditionEvaluator: Send + Sync {
    fn is_satisfied(&self, condition: &str, context: &TransitionContext, team: &TeamState) -> bool;
}

impl<F> ConditionEvaluator for F
where
    F: Fn(&str, &TransitionContext, &TeamState) -> bool + Send + Sync,
{
    fn is_satisfied(&self, condition: &str, context: &TransitionContext, team: &TeamState) -> bool {
        self(condition, context, team)
    }
}

/// Treats every condition as satisfied. This is the machine default, so the
/// graph alone decides legality.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissiveConditions;

impl ConditionEvaluator for PermissiveConditions {
    fn is_satisfied(&self, _condition: &str, _context: &TransitionContext, _team: &TeamState) -> bool {
        true
    }
}

/// A condition holds only when the caller asserted it in
/// [`TransitionContext::satisfied_conditions`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AssertedConditions;

impl ConditionEvaluator for AssertedConditions {
    fn is_satisfied(&self, condition: &str, context: &TransitionContext, _team: &TeamState) -> bool {
        context.has_condition(condition)
    }
}

/// Phase a hook runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    Exit,
    Entry,
}

impl HookPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookPhase::Exit => "exit",
            HookPhase::Entry => "entry",
        }
    }
}

/// Actions run around a committed transition.
///
/// `on_exit` runs after the snapshot and before the commit; an error aborts
/// the transition. `on_enter` runs after the commit; an error rolls the team
/// back to the state it left.
pub trait StateHooks: Send + Sync {
    fn on_exit(&self, _state: &StateDefinition, _team: &TeamState, _context: &TransitionContext) -> ConcordResult<()> {
        Ok(())
    }

    fn on_enter(&self, _state: &StateDefinition, _team: &TeamState, _context: &TransitionContext) -> ConcordResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl StateHooks for NoopHooks {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asserted_conditions() {
        let team = TeamState::new("idle");
        let ctx = TransitionContext::new("s").with_condition("has_task");
        assert!(AssertedConditions.is_satisfied("has_task", &ctx, &team));
        assert!(!AssertedConditions.is_satisfied("team_activated", &ctx, &team));
        assert!(PermissiveConditions.is_satisfied("team_activated", &ctx, &team));
    }

    #[test]
    fn test_closure_evaluator() {
        let team = TeamState::new("idle");
        let evaluator = |condition: &str, _: &TransitionContext, team: &TeamState| {
            condition == "idle_only" && team.collaboration_mode == "idle"
        };
        assert!(evaluator.is_satisfied("idle_only", &TransitionContext::default(), &team));
        assert!(!evaluator.is_satisfied("other", &TransitionContext::default(), &team));
    }
}
