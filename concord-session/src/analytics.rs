//! Collaboration patterns, effectiveness and outcome prediction

use crate::tracker::{CollaborationSessionTracker, TrackerState};
use concord_core::{
    ActorId, CollaborationKind, CollaborationPattern, CollaborationSession, ConcordResult,
    EffectivenessReport, OutcomePrediction, SessionStatus,
};
use std::collections::{BTreeMap, BTreeSet};

/// Participant overlap above which a past session counts as similar.
const SIMILARITY_THRESHOLD: f64 = 0.5;
const DEFAULT_SUCCESS_PROBABILITY: f64 = 70.0;
const DEFAULT_DURATION_MS: f64 = 60.0 * 60.0 * 1000.0;
/// Patterns need a success rate above this to count as effective.
const EFFECTIVE_PATTERN_RATE: f64 = 80.0;
const TOP_PATTERNS: usize = 5;
const LARGE_GROUP: usize = 5;

/// Practices every effectiveness report carries.
const SESSION_PRACTICES: [&str; 5] = [
    "Establish clear objectives before starting collaboration",
    "Use structured collaboration formats for complex decisions",
    "Implement regular check-ins during long sessions",
    "Develop conflict resolution protocols",
    "Encourage equal participation from all members",
];

/// Sorted, comma-joined participant ids.
pub fn participant_key(participants: &[ActorId]) -> String {
    let mut sorted: Vec<&str> = participants.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.dedup();
    sorted.join(",")
}

/// Jaccard similarity of two participant sets.
pub fn participant_overlap(a: &[ActorId], b: &[ActorId]) -> f64 {
    let a: BTreeSet<&ActorId> = a.iter().collect();
    let b: BTreeSet<&ActorId> = b.iter().collect();
    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}

fn duration_ms(session: &CollaborationSession) -> f64 {
    session
        .end_time
        .map(|end| (end - session.start_time).num_milliseconds() as f64)
        .unwrap_or(0.0)
}

/// Fold an ended session into the running pattern for its participant set.
pub(crate) fn fold_pattern(patterns: &mut BTreeMap<String, CollaborationPattern>, session: &CollaborationSession) {
    let key = participant_key(&session.participants);
    let success = if session.status == SessionStatus::Completed { 100.0 } else { 0.0 };
    let duration = duration_ms(session);

    match patterns.get_mut(&key) {
        Some(pattern) => {
            pattern.frequency += 1;
            let n = f64::from(pattern.frequency);
            pattern.success_rate = (pattern.success_rate * (n - 1.0) + success) / n;
            pattern.average_duration_ms = (pattern.average_duration_ms * (n - 1.0) + duration) / n;
        }
        None => {
            patterns.insert(
                key.clone(),
                CollaborationPattern {
                    name: format!("{:?} with {}", session.kind, session.participants.join(", ")),
                    key,
                    participants: session.participants.clone(),
                    kind: session.kind,
                    frequency: 1,
                    success_rate: success,
                    average_duration_ms: duration,
                },
            );
        }
    }
}

impl CollaborationSessionTracker {
    /// Patterns learned from ended sessions, ordered by participant key.
    pub fn patterns(&self) -> ConcordResult<Vec<CollaborationPattern>> {
        Ok(self.read()?.patterns.values().cloned().collect())
    }

    pub fn effectiveness(&self) -> ConcordResult<EffectivenessReport> {
        let state = self.read()?;
        let ended: Vec<&CollaborationSession> = state.ended_sessions().collect();
        let total = ended.len();
        let completed = ended.iter().filter(|s| s.status == SessionStatus::Completed).count();

        let mut most_effective: Vec<CollaborationPattern> = state
            .patterns
            .values()
            .filter(|p| p.success_rate > EFFECTIVE_PATTERN_RATE)
            .cloned()
            .collect();
        most_effective.sort_by(|a, b| b.success_rate.total_cmp(&a.success_rate));
        most_effective.truncate(TOP_PATTERNS);

        Ok(EffectivenessReport {
            total_sessions: total,
            average_success_rate: if total == 0 {
                0.0
            } else {
                completed as f64 / total as f64 * 100.0
            },
            most_effective_patterns: most_effective,
            improvement_areas: improvement_areas(&state),
            recommendations: SESSION_PRACTICES.iter().map(|p| p.to_string()).collect(),
        })
    }

    /// Predict how a session with these participants would go, from ended
    /// sessions of the same kind with overlapping participants.
    pub fn predict_outcome(&self, participants: &[ActorId], kind: CollaborationKind) -> ConcordResult<OutcomePrediction> {
        let state = self.read()?;
        let similar: Vec<&CollaborationSession> = state
            .ended_sessions()
            .filter(|s| s.kind == kind && participant_overlap(&s.participants, participants) > SIMILARITY_THRESHOLD)
            .collect();

        let (success_probability, expected_duration_ms) = if similar.is_empty() {
            (DEFAULT_SUCCESS_PROBABILITY, DEFAULT_DURATION_MS)
        } else {
            let n = similar.len() as f64;
            let completed = similar.iter().filter(|s| s.status == SessionStatus::Completed).count();
            (
                completed as f64 / n * 100.0,
                similar.iter().map(|s| duration_ms(s)).sum::<f64>() / n,
            )
        };

        Ok(OutcomePrediction {
            success_probability,
            expected_duration_ms,
            similar_sessions: similar.len(),
            risk_factors: risk_factors(participants, kind),
            recommendations: recommendations(participants, kind),
        })
    }
}

fn improvement_areas(state: &TrackerState) -> Vec<String> {
    let ended: Vec<&CollaborationSession> = state.ended_sessions().collect();
    let total = ended.len() as f64;
    let mut areas = Vec::new();

    let unsuccessful = ended
        .iter()
        .filter(|s| matches!(s.status, SessionStatus::Failed | SessionStatus::Cancelled))
        .count();
    if unsuccessful as f64 > total * 0.2 {
        areas.push("High failure rate - need better preparation and conflict resolution".to_string());
    }

    let overran = ended
        .iter()
        .filter(|s| {
            s.metadata
                .expected_duration
                .is_some_and(|expected| duration_ms(s) > expected.as_millis() as f64 * 1.5)
        })
        .count();
    if overran as f64 > total * 0.3 {
        areas.push("Sessions often exceed expected duration - improve time management".to_string());
    }
    areas
}

fn risk_factors(participants: &[ActorId], kind: CollaborationKind) -> Vec<String> {
    let mut risks = Vec::new();
    if participants.len() > LARGE_GROUP {
        risks.push("Large group size may reduce efficiency".to_string());
    }
    if kind == CollaborationKind::DecisionMaking && participants.len() % 2 == 0 {
        risks.push("Even number of participants may lead to deadlocks".to_string());
    }
    risks
}

fn recommendations(participants: &[ActorId], kind: CollaborationKind) -> Vec<String> {
    let mut recs = Vec::new();
    if kind == CollaborationKind::Brainstorming {
        recs.push("Use divergent thinking techniques".to_string());
        recs.push("Defer judgment during idea generation".to_string());
    }
    if participants.len() > 3 {
        recs.push("Assign a facilitator to manage the session".to_string());
    }
    recs
}

// ============================================================================
// TESTS
// ============================================================================
