//! Role state store
//!
//! One versioned record per actor. The store is the only writer of
//! `RoleState::version`; every committed write bumps it by exactly one.
//! Each record sits behind its own mutex so writes to different actors never
//! contend, while a read-decide-commit cycle on one actor is exclusive.

use chrono::Utc;
use concord_core::{
    merge_state_data, ActorId, ConcordError, ConcordResult, RoleError, RoleMetadata, RoleState,
    RoleWrite, StateData, StorageError, Timestamp, TransitionContext,
};
use concord_events::{publish, SharedSink, Topic};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info};

const SOURCE: &str = "role_store";

type Record = Arc<Mutex<RoleState>>;

pub struct RoleStateStore {
    records: RwLock<HashMap<ActorId, Record>>,
    sink: SharedSink,
}

impl RoleStateStore {
    pub fn new(sink: SharedSink) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            sink,
        }
    }

    /// Create a version-1 record for `actor_id`.
    pub fn register(
        &self,
        actor_id: &str,
        initial_state: &str,
        context: &TransitionContext,
    ) -> ConcordResult<RoleState> {
        let mut records = self
            .records
            .write()
            .map_err(|_| ConcordError::Storage(StorageError::LockPoisoned))?;

        if records.contains_key(actor_id) {
            return Err(RoleError::DuplicateActor {
                actor_id: actor_id.to_string(),
                session_id: session_of(Some(context)),
            }
            .into());
        }

        let state = RoleState {
            actor_id: actor_id.to_string(),
            current_state: initial_state.to_string(),
            previous_state: None,
            state_data: StateData::new(),
            version: 1,
            last_updated: Utc::now(),
            metadata: RoleMetadata::from_context(context),
        };
        records.insert(actor_id.to_string(), Arc::new(Mutex::new(state.clone())));
        drop(records);

        info!(actor_id = %actor_id, state = %initial_state, "Role registered");
        publish(self.sink.as_ref(), Topic::RoleRegistered, SOURCE, &state);
        Ok(state)
    }

    /// Remove a record, returning its last state.
    pub fn unregister(&self, actor_id: &str) -> ConcordResult<RoleState> {
        let record = self
            .records
            .write()
            .map_err(|_| ConcordError::Storage(StorageError::LockPoisoned))?
            .remove(actor_id)
            .ok_or_else(|| unknown(actor_id, None))?;
        let state = lock(&record)?.clone();
        info!(actor_id = %actor_id, version = state.version, "Role unregistered");
        Ok(state)
    }

    /// Move an actor to `new_state`, merging `patch` into its payload.
    ///
    /// A context with a session id re-points the actor's session.
    pub fn update(
        &self,
        actor_id: &str,
        new_state: &str,
        patch: Option<&StateData>,
        context: Option<&TransitionContext>,
    ) -> ConcordResult<RoleState> {
        self.mutate(actor_id, session_of(context), |role, now| {
            let mut data = role.state_data.clone();
            if let Some(patch) = patch {
                merge_state_data(&mut data, patch);
            }
            let write = RoleWrite::keep(role).with_state(new_state).with_data(data);
            commit(role, write, now);
            if let Some(ctx) = context {
                if !ctx.session_id.is_empty() {
                    role.metadata.session_id = Some(ctx.session_id.clone());
                }
            }
            Ok(())
        })
        .map(|(_, state)| state)
    }

    /// Run a read-decide-commit cycle under the actor's exclusive lock.
    ///
    /// `decide` sees the current record and may propose a write; the store
    /// commits it and bumps the version. Returns the decision value and the
    /// committed record, if any.
    pub fn apply<T, F>(&self, actor_id: &str, decide: F) -> ConcordResult<(T, Option<RoleState>)>
    where
        F: FnOnce(&RoleState) -> ConcordResult<(T, Option<RoleWrite>)>,
    {
        let record = self.record(actor_id, None)?;
        let mut role = lock(&record)?;
        let (value, write) = decide(&*role)?;
        let committed = match write {
            Some(write) => {
                commit(&mut *role, write, Utc::now());
                Some(role.clone())
            }
            None => None,
        };
        drop(role);

        if let Some(state) = &committed {
            self.announce(state);
        }
        Ok((value, committed))
    }

    pub fn set_capabilities(&self, actor_id: &str, capabilities: Vec<String>) -> ConcordResult<RoleState> {
        self.mutate(actor_id, None, |role, now| {
            role.metadata.capabilities = capabilities;
            bump(role, now);
            Ok(())
        })
        .map(|(_, state)| state)
    }

    pub fn set_workload(&self, actor_id: &str, workload: u32) -> ConcordResult<RoleState> {
        self.mutate(actor_id, None, |role, now| {
            role.metadata.workload = workload;
            bump(role, now);
            Ok(())
        })
        .map(|(_, state)| state)
    }

    pub fn get(&self, actor_id: &str) -> ConcordResult<Option<RoleState>> {
        let record = {
            let records = self
                .records
                .read()
                .map_err(|_| ConcordError::Storage(StorageError::LockPoisoned))?;
            records.get(actor_id).cloned()
        };
        match record {
            Some(record) => Ok(Some(lock(&record)?.clone())),
            None => Ok(None),
        }
    }

    /// Every record, ordered by actor id.
    pub fn get_all(&self) -> ConcordResult<Vec<RoleState>> {
        let records: Vec<Record> = self
            .records
            .read()
            .map_err(|_| ConcordError::Storage(StorageError::LockPoisoned))?
            .values()
            .cloned()
            .collect();
        let mut states = records
            .iter()
            .map(|r| lock(r).map(|s| s.clone()))
            .collect::<ConcordResult<Vec<_>>>()?;
        states.sort_by(|a, b| a.actor_id.cmp(&b.actor_id));
        Ok(states)
    }

    /// Registered actor ids, sorted.
    pub fn actor_ids(&self) -> ConcordResult<Vec<ActorId>> {
        let mut ids: Vec<ActorId> = self
            .records
            .read()
            .map_err(|_| ConcordError::Storage(StorageError::LockPoisoned))?
            .keys()
            .cloned()
            .collect();
        ids.sort();
        Ok(ids)
    }

    pub fn contains(&self, actor_id: &str) -> ConcordResult<bool> {
        Ok(self
            .records
            .read()
            .map_err(|_| ConcordError::Storage(StorageError::LockPoisoned))?
            .contains_key(actor_id))
    }

    pub fn len(&self) -> ConcordResult<usize> {
        Ok(self
            .records
            .read()
            .map_err(|_| ConcordError::Storage(StorageError::LockPoisoned))?
            .len())
    }

    pub fn is_empty(&self) -> ConcordResult<bool> {
        Ok(self.len()? == 0)
    }

    fn record(&self, actor_id: &str, session_id: Option<String>) -> ConcordResult<Record> {
        self.records
            .read()
            .map_err(|_| ConcordError::Storage(StorageError::LockPoisoned))?
            .get(actor_id)
            .cloned()
            .ok_or_else(|| unknown(actor_id, session_id))
    }

    fn mutate<T, F>(&self, actor_id: &str, session_id: Option<String>, f: F) -> ConcordResult<(T, RoleState)>
    where
        F: FnOnce(&mut RoleState, Timestamp) -> ConcordResult<T>,
    {
        let record = self.record(actor_id, session_id)?;
        let mut role = lock(&record)?;
        let value = f(&mut *role, Utc::now())?;
        let state = role.clone();
        drop(role);

        self.announce(&state);
        Ok((value, state))
    }

    fn announce(&self, state: &RoleState) {
        debug!(
            actor_id = %state.actor_id,
            version = state.version,
            state = %state.current_state,
            "Role state committed"
        );
        publish(self.sink.as_ref(), Topic::RoleUpdated, SOURCE, state);
    }
}

fn lock(record: &Record) -> ConcordResult<std::sync::MutexGuard<'_, RoleState>> {
    record
        .lock()
        .map_err(|_| ConcordError::Storage(StorageError::LockPoisoned))
}

fn unknown(actor_id: &str, session_id: Option<String>) -> ConcordError {
    RoleError::UnknownActor {
        actor_id: actor_id.to_string(),
        session_id,
    }
    .into()
}

fn session_of(context: Option<&TransitionContext>) -> Option<String> {
    context
        .map(|ctx| ctx.session_id.clone())
        .filter(|session_id| !session_id.is_empty())
}

fn bump(role: &mut RoleState, now: Timestamp) {
    role.version += 1;
    role.last_updated = now;
}

fn commit(role: &mut RoleState, write: RoleWrite, now: Timestamp) {
    role.previous_state = Some(std::mem::replace(&mut role.current_state, write.current_state));
    role.state_data = write.state_data;
    if let Some(from) = write.synced_from {
        role.metadata.synced_from = Some(from);
        role.metadata.synced_at = Some(now);
    }
    bump(role, now);
}

// ============================================================================
// TESTS
// ============================================================================
