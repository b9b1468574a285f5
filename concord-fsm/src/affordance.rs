//! Affordance view: where the team is, where it can go, how to get back

use crate::TeamStateMachine;
use chrono::Utc;
use concord_core::{
    AffordanceResponse, Breadcrumb, ConcordResult, Navigation, QualityMetrics, RecoveryOption,
    TransitionContext,
};

const PATH_LEN: usize = 5;
const BREADCRUMB_LEN: usize = 10;
const RECOVERY_LEN: usize = 5;

impl TeamStateMachine {
    /// Current state plus next actions, navigation, recovery points and
    /// transition quality.
    pub fn affordance_response(&self, context: &TransitionContext) -> ConcordResult<AffordanceResponse> {
        let current = self.current_state()?;
        let next_actions = self.get_available_actions(context)?;

        let (state_name, state_description, possible_paths) = {
            let states = self.read_states()?;
            match states.get(&current.collaboration_mode) {
                Some(def) => (
                    def.name.clone(),
                    def.description.clone(),
                    def.allowed_transitions.values().cloned().collect(),
                ),
                None => (
                    current.collaboration_mode.clone(),
                    "Current team state".to_string(),
                    Vec::new(),
                ),
            }
        };

        let (navigation, quality) = {
            let history = self.read_history()?;
            let navigation = Navigation {
                current_path: tail(history.as_slice(), PATH_LEN).iter().map(|h| h.to_state.clone()).collect(),
                possible_paths,
                breadcrumbs: tail(history.as_slice(), BREADCRUMB_LEN)
                    .iter()
                    .map(|h| Breadcrumb {
                        state: h.to_state.clone(),
                        timestamp: h.timestamp,
                    })
                    .collect(),
            };

            let failed = history.iter().filter(|h| !h.success).count();
            let quality = QualityMetrics {
                transition_success_rate: if history.is_empty() {
                    100.0
                } else {
                    (history.len() - failed) as f64 / history.len() as f64 * 100.0
                },
                total_transitions: history.len(),
                failed_transitions: failed,
            };
            (navigation, quality)
        };

        let recovery_options = self
            .snapshots()
            .recent(RECOVERY_LEN)?
            .into_iter()
            .map(|s| RecoveryOption {
                snapshot_id: s.id,
                timestamp: s.timestamp,
                description: format!(
                    "Restore to '{}' captured at {}",
                    s.team_state.collaboration_mode,
                    s.timestamp.to_rfc3339()
                ),
            })
            .collect();

        Ok(AffordanceResponse {
            timestamp: Utc::now(),
            current_state: current,
            state_name,
            state_description,
            next_actions,
            navigation,
            recovery_options,
            quality,
        })
    }
}

fn tail<T>(items: &[T], n: usize) -> &[T] {
    &items[items.len().saturating_sub(n)..]
}
