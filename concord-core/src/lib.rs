//! Concord Core - Entity Types
//!
//! Pure data structures shared by every Concord crate: identities, team and
//! role state records, sync rules, snapshots, sessions, errors and engine
//! configuration. Behavior lives in the component crates.

mod config;
mod error;
mod identity;
mod role;
mod session;
mod snapshot;
mod sync;
mod team;
mod value;

pub use config::*;
pub use error::*;
pub use identity::*;
pub use role::*;
pub use session::*;
pub use snapshot::*;
pub use sync::*;
pub use team::*;
pub use value::*;

// ============================================================================
// PROPERTY TESTS
// ============================================================================

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Checksums are stable for equal content and hex-encoded.
        #[test]
        fn prop_checksum_deterministic(content in prop::collection::vec(any::<u8>(), 0..256)) {
            let a = content_checksum(&content);
            let b = content_checksum(&content);
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(a.len(), 64);
            prop_assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        }

        /// The wildcard matches every actor; any other pattern only itself.
        #[test]
        fn prop_actor_matches(actor in "[a-z]{1,12}", other in "[a-z]{1,12}") {
            prop_assert!(actor_matches(WILDCARD_ACTOR, &actor));
            prop_assert!(actor_matches(&actor, &actor));
            prop_assert_eq!(actor_matches(&other, &actor), other == actor);
        }

        /// Merging a patch makes every patch key visible with the patch value.
        #[test]
        fn prop_merge_patch_wins(
            base in prop::collection::btree_map("[a-d]", 0i64..10, 0..4),
            patch in prop::collection::btree_map("[a-d]", 10i64..20, 0..4),
        ) {
            let mut merged: StateData = base.iter().map(|(k, v)| (k.clone(), (*v).into())).collect();
            let patch_data: StateData = patch.iter().map(|(k, v)| (k.clone(), (*v).into())).collect();
            merge_state_data(&mut merged, &patch_data);
            for (k, v) in &patch {
                prop_assert_eq!(merged.get(k), Some(&serde_json::Value::from(*v)));
            }
            for k in base.keys() {
                prop_assert!(merged.contains_key(k));
            }
        }
    }
}
