//! Conflict detection and resolution for propagation
//!
//! Detection is ordered and first match wins:
//! 1. the target is ahead by version: the target wins and nothing is written
//! 2. the states differ and the target was written more recently: merge, or
//!    manual input under a manual policy
//! 3. otherwise the target adopts the source
//!
//! Resolution never writes. It proposes a [`RoleWrite`] that the store commits
//! under the target's lock.

use concord_core::{
    merge_state_data, merge_state_data_keep_existing, Conflict, ConflictPolicy, ConflictType,
    ResolutionStrategy, RoleState, RoleWrite, StateData, SyncError, Transformation,
};

/// How one propagation should treat its target.
#[derive(Debug, Clone, Default)]
pub struct PropagationPlan {
    /// Rule being executed; `None` for manual syncs
    pub rule_id: Option<String>,
    pub transformation: Option<Transformation>,
    pub policy: ConflictPolicy,
    /// Caller-supplied payload for manual conflict resolution
    pub manual_input: Option<StateData>,
}

impl PropagationPlan {
    fn rule_label(&self) -> String {
        self.rule_id.clone().unwrap_or_else(|| "manual".to_string())
    }
}

/// A conflict that could not be resolved, kept for the audit record.
#[derive(Debug, Clone, PartialEq)]
pub struct Unresolved {
    pub conflict: Conflict,
    pub error: SyncError,
}

/// Result of resolving one (source, target) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub conflict: Option<Conflict>,
    /// Write to commit on the target, if any
    pub write: Option<RoleWrite>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver;

impl ConflictResolver {
    pub fn new() -> Self {
        Self
    }

    /// Classify divergence between source and target, if any.
    pub fn detect(&self, source: &RoleState, target: &RoleState) -> Option<Conflict> {
        if target.version > source.version {
            return Some(Conflict {
                actor_id: target.actor_id.clone(),
                conflict_type: ConflictType::Version,
                description: format!(
                    "Target version ({}) is newer than source ({})",
                    target.version, source.version
                ),
                resolution: ResolutionStrategy::TargetWins,
                resolved_value: None,
            });
        }

        if target.current_state != source.current_state && target.last_updated > source.last_updated
        {
            return Some(Conflict {
                actor_id: target.actor_id.clone(),
                conflict_type: ConflictType::State,
                description: format!(
                    "State conflict: target={}, source={}",
                    target.current_state, source.current_state
                ),
                resolution: ResolutionStrategy::Merge,
                resolved_value: None,
            });
        }

        None
    }

    /// Decide what to write into `target` for a propagation from `source`.
    pub fn resolve(
        &self,
        source: &RoleState,
        target: &RoleState,
        plan: &PropagationPlan,
    ) -> Result<Resolution, Unresolved> {
        let transformed = plan.transformation.as_ref().map(|t| t.apply(source));

        let Some(mut conflict) = self.detect(source, target) else {
            let mut data = target.state_data.clone();
            merge_state_data(&mut data, &source.state_data);
            if let Some(out) = &transformed {
                merge_state_data(&mut data, out);
            }
            let write = RoleWrite::keep(target)
                .with_state(source.current_state.clone())
                .with_data(data)
                .synced_from(source.actor_id.clone());
            return Ok(Resolution {
                conflict: None,
                write: Some(write),
            });
        };

        match conflict.conflict_type {
            ConflictType::State if plan.policy == ConflictPolicy::Manual => {
                conflict.resolution = ResolutionStrategy::Manual;
                let Some(input) = &plan.manual_input else {
                    return Err(Unresolved {
                        conflict,
                        error: SyncError::SyncConflictUnresolved {
                            rule_id: plan.rule_label(),
                            source_actor: source.actor_id.clone(),
                            target_actor: target.actor_id.clone(),
                        },
                    });
                };
                let mut data = target.state_data.clone();
                merge_state_data(&mut data, input);
                conflict.resolved_value = Some(input.clone());
                let write = RoleWrite::keep(target)
                    .with_data(data)
                    .synced_from(source.actor_id.clone());
                Ok(Resolution {
                    conflict: Some(conflict),
                    write: Some(write),
                })
            }
            ConflictType::State => {
                let mut data = target.state_data.clone();
                merge_state_data_keep_existing(&mut data, &source.state_data);
                if let Some(out) = &transformed {
                    merge_state_data(&mut data, out);
                }
                conflict.resolved_value = Some(data.clone());
                let write = RoleWrite::keep(target)
                    .with_data(data)
                    .synced_from(source.actor_id.clone());
                Ok(Resolution {
                    conflict: Some(conflict),
                    write: Some(write),
                })
            }
            _ => Ok(Resolution {
                conflict: Some(conflict),
                write: None,
            }),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use concord_core::RoleMetadata;
    use serde_json::json;

    fn role(actor: &str, state: &str, version: u64, data: serde_json::Value) -> RoleState {
        RoleState {
            actor_id: actor.to_string(),
            current_state: state.to_string(),
            previous_state: None,
            state_data: data.as_object().cloned().unwrap_or_default(),
            version,
            last_updated: Utc::now(),
            metadata: RoleMetadata::default(),
        }
    }

    fn newer(mut r: RoleState) -> RoleState {
        r.last_updated = r.last_updated + Duration::seconds(5);
        r
    }

    #[test]
    fn test_no_conflict_adopts_source() {
        let source = role("a", "DONE", 2, json!({"shared": "src", "a_only": 1}));
        let target = role("b", "READY", 1, json!({"shared": "tgt", "b_only": 2}));
        let res = ConflictResolver::new()
            .resolve(&source, &target, &PropagationPlan::default())
            .unwrap();

        assert!(res.conflict.is_none());
        let write = res.write.unwrap();
        assert_eq!(write.current_state, "DONE");
        assert_eq!(write.state_data["shared"], json!("src"));
        assert_eq!(write.state_data["a_only"], json!(1));
        assert_eq!(write.state_data["b_only"], json!(2));
        assert_eq!(write.synced_from.as_deref(), Some("a"));
    }

    #[test]
    fn test_version_conflict_target_wins_even_with_transformation() {
        let source = role("a", "DONE", 2, json!({}));
        let target = role("b", "READY", 5, json!({}));
        let plan = PropagationPlan {
            transformation: Some(Transformation::Set {
                key: "k".to_string(),
                value: json!(1),
            }),
            policy: ConflictPolicy::Manual,
            manual_input: Some(StateData::new()),
            ..Default::default()
        };
        let res = ConflictResolver::new().resolve(&source, &target, &plan).unwrap();
        let conflict = res.conflict.unwrap();
        assert_eq!(conflict.conflict_type, ConflictType::Version);
        assert_eq!(conflict.resolution, ResolutionStrategy::TargetWins);
        assert!(res.write.is_none());
    }

    #[test]
    fn test_state_conflict_merges_target_keys_first() {
        let source = role("a", "DONE", 3, json!({"shared": "src", "a_only": 1}));
        let target = newer(role("b", "BUSY", 2, json!({"shared": "tgt"})));
        let res = ConflictResolver::new()
            .resolve(&source, &target, &PropagationPlan::default())
            .unwrap();

        let conflict = res.conflict.unwrap();
        assert_eq!(conflict.conflict_type, ConflictType::State);
        assert_eq!(conflict.resolution, ResolutionStrategy::Merge);
        let write = res.write.unwrap();
        assert_eq!(write.current_state, "BUSY");
        assert_eq!(write.state_data["shared"], json!("tgt"));
        assert_eq!(write.state_data["a_only"], json!(1));
        assert_eq!(conflict.resolved_value, Some(write.state_data));
    }

    #[test]
    fn test_state_conflict_transformation_output_wins() {
        let source = role("a", "DONE", 3, json!({"doc": "v2"}));
        let target = newer(role("b", "BUSY", 2, json!({"doc": "v1"})));
        let plan = PropagationPlan {
            transformation: Some(Transformation::Select {
                keys: vec!["doc".to_string()],
            }),
            ..Default::default()
        };
        let res = ConflictResolver::new().resolve(&source, &target, &plan).unwrap();
        assert_eq!(res.write.unwrap().state_data["doc"], json!("v2"));
    }

    #[test]
    fn test_manual_policy_without_input_is_unresolved() {
        let source = role("a", "DONE", 3, json!({}));
        let target = newer(role("b", "BUSY", 2, json!({})));
        let plan = PropagationPlan {
            rule_id: Some("r1".to_string()),
            policy: ConflictPolicy::Manual,
            ..Default::default()
        };
        let unresolved = ConflictResolver::new()
            .resolve(&source, &target, &plan)
            .unwrap_err();
        assert_eq!(
            unresolved.error,
            SyncError::SyncConflictUnresolved {
                rule_id: "r1".to_string(),
                source_actor: "a".to_string(),
                target_actor: "b".to_string(),
            }
        );
        // the conflict seen under the target's lock travels with the error
        assert_eq!(unresolved.conflict.actor_id, "b");
        assert_eq!(unresolved.conflict.conflict_type, ConflictType::State);
        assert_eq!(unresolved.conflict.resolution, ResolutionStrategy::Manual);
        assert!(unresolved.conflict.resolved_value.is_none());
    }

    #[test]
    fn test_manual_policy_uses_input() {
        let source = role("a", "DONE", 3, json!({}));
        let target = newer(role("b", "BUSY", 2, json!({"x": 1})));
        let input = json!({"x": 9}).as_object().cloned().unwrap();
        let plan = PropagationPlan {
            policy: ConflictPolicy::Manual,
            manual_input: Some(input.clone()),
            ..Default::default()
        };
        let res = ConflictResolver::new().resolve(&source, &target, &plan).unwrap();
        let conflict = res.conflict.unwrap();
        assert_eq!(conflict.resolution, ResolutionStrategy::Manual);
        assert_eq!(conflict.resolved_value, Some(input));
        let write = res.write.unwrap();
        assert_eq!(write.current_state, "BUSY");
        assert_eq!(write.state_data["x"], json!(9));
    }

    #[test]
    fn test_manual_policy_without_conflict_applies_directly() {
        let source = role("a", "DONE", 3, json!({}));
        let target = role("b", "READY", 1, json!({}));
        let plan = PropagationPlan {
            policy: ConflictPolicy::Manual,
            ..Default::default()
        };
        let res = ConflictResolver::new().resolve(&source, &target, &plan).unwrap();
        assert!(res.conflict.is_none());
        assert_eq!(res.write.unwrap().current_state, "DONE");
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use chrono::Utc;
    use concord_core::RoleMetadata;
    use proptest::prelude::*;

    fn bare(actor: &str, state: &str, version: u64) -> RoleState {
        RoleState {
            actor_id: actor.to_string(),
            current_state: state.to_string(),
            previous_state: None,
            state_data: StateData::new(),
            version,
            last_updated: Utc::now(),
            metadata: RoleMetadata::default(),
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// A target ahead by version always wins, whatever the plan says.
        #[test]
        fn prop_version_conflict_always_target_wins(
            source_version in 1u64..50,
            lead in 1u64..50,
            manual in any::<bool>(),
            with_transform in any::<bool>(),
        ) {
            let source = bare("a", "X", source_version);
            let target = bare("b", "Y", source_version + lead);
            let plan = PropagationPlan {
                rule_id: Some("r".to_string()),
                transformation: with_transform.then(|| Transformation::SourceState { key: "s".to_string() }),
                policy: if manual { ConflictPolicy::Manual } else { ConflictPolicy::Detect },
                manual_input: None,
            };
            let res = ConflictResolver::new().resolve(&source, &target, &plan);
            prop_assert!(res.is_ok());
            let res = res.unwrap();
            prop_assert!(res.write.is_none());
            let conflict = res.conflict.unwrap();
            prop_assert_eq!(conflict.resolution, ResolutionStrategy::TargetWins);
        }
    }
}
