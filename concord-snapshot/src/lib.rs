//! Concord Snapshot - Team State Recovery Points
//!
//! Snapshots are captured before every team transition and kept in a bounded
//! ring. Each one carries the hex SHA-256 of its team state; restore refuses
//! any snapshot whose checksum no longer matches.

use concord_core::{
    ConcordError, ConcordResult, EngineConfig, EntityId, Snapshot, SnapshotError, StorageError,
    TeamState, Timestamp, TransitionContext,
};
use concord_events::{publish, SharedSink, Topic};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::RwLock;
use tracing::{debug, info, warn};

const SOURCE: &str = "snapshot_manager";

/// Published on every capture. The full team state stays in the manager.
#[derive(Debug, Clone, Serialize)]
struct CapturedNotice<'a> {
    snapshot_id: EntityId,
    timestamp: Timestamp,
    collaboration_mode: &'a str,
    checksum: &'a str,
    session_id: &'a str,
}

pub struct SnapshotManager {
    snapshots: RwLock<VecDeque<Snapshot>>,
    capacity: usize,
    eviction_batch: usize,
    sink: SharedSink,
}

impl SnapshotManager {
    /// Create a manager holding at most `capacity` snapshots.
    ///
    /// When a capture overflows the ring, the oldest `eviction_batch`
    /// snapshots are dropped at once.
    pub fn new(capacity: usize, eviction_batch: usize, sink: SharedSink) -> Self {
        let capacity = capacity.max(1);
        Self {
            snapshots: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
            eviction_batch: eviction_batch.clamp(1, capacity),
            sink,
        }
    }

    pub fn from_config(config: &EngineConfig, sink: SharedSink) -> Self {
        Self::new(config.snapshot_capacity, config.snapshot_eviction_batch, sink)
    }

    /// Capture a snapshot of `team_state`.
    ///
    /// # Arguments
    /// * `team_state` - State to copy; the caller keeps ownership
    /// * `context` - Context of the request that caused the capture
    ///
    /// # Returns
    /// The stored snapshot
    pub fn capture(&self, team_state: &TeamState, context: &TransitionContext) -> ConcordResult<Snapshot> {
        let snapshot = Snapshot::seal(team_state, context)?;
        self.insert(snapshot.clone())?;

        debug!(
            snapshot_id = %snapshot.id,
            state = %snapshot.team_state.collaboration_mode,
            "Snapshot captured"
        );
        publish(
            self.sink.as_ref(),
            Topic::SnapshotCaptured,
            SOURCE,
            &CapturedNotice {
                snapshot_id: snapshot.id,
                timestamp: snapshot.timestamp,
                collaboration_mode: &snapshot.team_state.collaboration_mode,
                checksum: &snapshot.checksum,
                session_id: &snapshot.context.session_id,
            },
        );
        Ok(snapshot)
    }

    /// Verify and return the team state stored in a snapshot.
    ///
    /// # Arguments
    /// * `snapshot_id` - Snapshot to restore
    ///
    /// # Returns
    /// A copy of the stored team state, or `CorruptSnapshot` when the
    /// checksum does not match. The manager itself is never modified.
    pub fn restore(&self, snapshot_id: EntityId) -> ConcordResult<TeamState> {
        let snapshot = self.get(snapshot_id)?.ok_or(SnapshotError::NotFound { snapshot_id })?;

        let actual = snapshot.compute_checksum()?;
        if actual != snapshot.checksum {
            warn!(snapshot_id = %snapshot_id, "Snapshot checksum mismatch");
            return Err(SnapshotError::CorruptSnapshot {
                snapshot_id,
                expected: snapshot.checksum,
                actual,
            }
            .into());
        }

        info!(
            snapshot_id = %snapshot_id,
            state = %snapshot.team_state.collaboration_mode,
            "Snapshot verified for restore"
        );
        Ok(snapshot.team_state)
    }

    /// Whether a stored snapshot still matches its checksum.
    pub fn verify(&self, snapshot_id: EntityId) -> ConcordResult<bool> {
        let snapshot = self.get(snapshot_id)?.ok_or(SnapshotError::NotFound { snapshot_id })?;
        Ok(snapshot.verify()?)
    }

    /// Rehydrate an externally persisted snapshot as-is.
    ///
    /// The checksum is not checked here; a corrupt import is rejected when it
    /// is restored. An existing snapshot with the same id is replaced.
    pub fn import(&self, snapshot: Snapshot) -> ConcordResult<()> {
        {
            let mut snapshots = self.write()?;
            snapshots.retain(|s| s.id != snapshot.id);
        }
        debug!(snapshot_id = %snapshot.id, "Snapshot imported");
        self.insert(snapshot)
    }

    pub fn get(&self, snapshot_id: EntityId) -> ConcordResult<Option<Snapshot>> {
        Ok(self.read()?.iter().find(|s| s.id == snapshot_id).cloned())
    }

    /// Most recently stored snapshot.
    pub fn latest(&self) -> ConcordResult<Option<Snapshot>> {
        Ok(self.read()?.back().cloned())
    }

    /// The last `n` snapshots, oldest first.
    pub fn recent(&self, n: usize) -> ConcordResult<Vec<Snapshot>> {
        let snapshots = self.read()?;
        let skip = snapshots.len().saturating_sub(n);
        Ok(snapshots.iter().skip(skip).cloned().collect())
    }

    pub fn len(&self) -> ConcordResult<usize> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> ConcordResult<bool> {
        Ok(self.read()?.is_empty())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn insert(&self, snapshot: Snapshot) -> ConcordResult<()> {
        let mut snapshots = self.write()?;
        snapshots.push_back(snapshot);
        if snapshots.len() > self.capacity {
            let evict = self.eviction_batch.min(snapshots.len());
            snapshots.drain(..evict);
            debug!(evicted = evict, remaining = snapshots.len(), "Snapshots evicted");
        }
        Ok(())
    }

    fn read(&self) -> ConcordResult<std::sync::RwLockReadGuard<'_, VecDeque<Snapshot>>> {
        self.snapshots
            .read()
            .map_err(|_| ConcordError::Storage(StorageError::LockPoisoned))
    }

    fn write(&self) -> ConcordResult<std::sync::RwLockWriteGuard<'_, VecDeque<Snapshot>>> {
        self.snapshots
            .write()
            .map_err(|_| ConcordError::Storage(StorageError::LockPoisoned))
    }
}

// ============================================================================
// TESTS
// ============================================================================


#[cfg(test)]
mod prop_tests {
    use super::*;
    use concord_events::NullNotifier;
    use proptest::prelude::*;
    use std::sync::Arc;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// The ring never exceeds its capacity and always keeps the newest.
        #[test]
        fn prop_ring_bounded(captures in 1usize..60, capacity in 10usize..20, batch in 1usize..10) {
            let manager = SnapshotManager::new(capacity, batch, Arc::new(NullNotifier));
            let mut last = None;
            for i in 0..captures {
                let mut state = TeamState::new("idle");
                state.progress = (i % 100) as u8;
                last = Some(manager.capture(&state, &TransitionContext::default()).unwrap().id);
            }
            prop_assert!(manager.len().unwrap() <= capacity);
            prop_assert_eq!(manager.latest().unwrap().map(|s| s.id), last);
        }

        /// Any captured state restores to an equal state.
        #[test]
        fn prop_restore_returns_captured(mode in "[a-z]{1,10}", progress in 0u8..=100, actors in prop::collection::vec("[a-z]{1,8}", 0..5)) {
            let manager = SnapshotManager::new(100, 10, Arc::new(NullNotifier));
            let mut state = TeamState::new(mode);
            state.progress = progress;
            state.active_actors = actors;
            let snapshot = manager.capture(&state, &TransitionContext::default()).unwrap();
            prop_assert_eq!(manager.restore(snapshot.id).unwrap(), state);
        }
    }
}
