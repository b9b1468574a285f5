//! Identity types for Concord entities

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Entity identifier using UUIDv7 for timestamp-sortable IDs.
/// Used for snapshots, sync runs, sessions and notifications.
pub type EntityId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Identifier of an actor (role) participating in the team.
pub type ActorId = String;

/// Identifier of a registered team state definition.
pub type StateId = String;

/// SHA-256 content hash for integrity verification.
pub type ContentHash = [u8; 32];

/// Actor id that matches every registered actor in sync rules.
pub const WILDCARD_ACTOR: &str = "*";

/// Generate a new UUIDv7 EntityId (timestamp-sortable).
pub fn new_entity_id() -> EntityId {
    Uuid::now_v7()
}

/// Compute SHA-256 hash of content.
pub fn compute_content_hash(content: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Compute the lowercase hex SHA-256 digest of content.
pub fn content_checksum(content: &[u8]) -> String {
    hex::encode(compute_content_hash(content))
}

/// Whether an actor id in a rule matches a concrete actor.
pub fn actor_matches(pattern: &str, actor_id: &str) -> bool {
    pattern == WILDCARD_ACTOR || pattern == actor_id
}
